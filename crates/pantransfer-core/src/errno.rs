//! Provider error codes
//!
//! The provider reports failures as integer `errno`/`error_code` values.
//! Known codes are mapped to a readable message; unknown codes keep the
//! message the server sent.

use crate::error::TransferError;
use std::collections::HashMap;
use std::sync::LazyLock;

const ERROR_CODES: &[(i64, &str)] = &[
    (-31066, "file does not exist"),
    (-10, "cloud storage is full"),
    (-9, "file or directory does not exist"),
    (-8, "file or directory already exists"),
    (-7, "invalid file or directory name, or access denied"),
    (-6, "authentication failed"),
    (-3, "file does not exist"),
    (-1, "membership has expired"),
    (0, "request succeeded"),
    (2, "invalid parameter"),
    (3, "open API not supported"),
    (6, "user data access not allowed"),
    (10, "failed to create file"),
    (11, "share sent by yourself"),
    (12, "batch transfer failed"),
    (111, "access token expired or another async task is running"),
    (255, "too many files to transfer"),
    (2131, "share does not exist"),
    (31023, "invalid parameter"),
    (31024, "no upload permission"),
    (31034, "request rate limited"),
    (31045, "access token rejected, check that it has not expired and includes drive scope"),
    (31061, "file already exists"),
    (31064, "no permission to upload into this directory"),
    (31190, "file does not exist"),
    (31299, "first block is smaller than 4MB"),
    (31326, "hotlink protection triggered, check the User-Agent header"),
    (31362, "signature error, check that the link is complete"),
    (31363, "block missing"),
    (31364, "block size exceeds the limit"),
    (31365, "total file size exceeds the limit"),
    (42214, "failed to query file base info"),
    (42905, "failed to query username, retry later"),
];

static ERROR_TABLE: LazyLock<HashMap<i64, &'static str>> =
    LazyLock::new(|| ERROR_CODES.iter().copied().collect());

/// Look up the message for a known provider code
pub fn describe(errno: i64) -> Option<&'static str> {
    ERROR_TABLE.get(&errno).copied()
}

/// Build a provider error, preferring the table message over the raw one
pub fn provider_error(errno: i64, raw_message: Option<&str>) -> TransferError {
    let message = match (describe(errno), raw_message) {
        (Some(known), _) => known.to_string(),
        (None, Some(raw)) if !raw.is_empty() => raw.to_string(),
        (None, _) => format!("unknown error code {errno}"),
    };
    TransferError::Provider { errno, message }
}
