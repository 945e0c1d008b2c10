//! HTTP implementation of [`PanApi`] on top of reqwest
//!
//! Besides the transfer endpoints this client resolves file ids and
//! remote paths into direct links, which the download entry points need.

use crate::api::{
    BlockUploadRequest, CreateFileRequest, CreatedFile, PanApi, PrecreateRequest,
    PrecreateResponse, RangeResponse,
};
use crate::errno::provider_error;
use crate::error::TransferError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use pantransfer_types::{RemoteEntry, Settings};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Fixed connect and read timeout. Bodies may take longer as long as bytes keep arriving.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const FILE_ENDPOINT: &str = "/rest/2.0/xpan/file";
const MULTIMEDIA_ENDPOINT: &str = "/rest/2.0/xpan/multimedia";
const SUPERFILE_ENDPOINT: &str = "/rest/2.0/pcs/superfile2";

/// Remote file metadata together with its direct link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub entry: RemoteEntry,
    pub dlink: Option<String>,
}

/// Authenticated client for the provider's HTTP API
#[derive(Clone, Debug)]
pub struct PanClient {
    client: Client,
    access_token: String,
    api_base: Url,
    pcs_base: Url,
}

impl PanClient {
    /// Build a client from settings. An access token is required.
    pub fn new(settings: &Settings) -> Result<Self, TransferError> {
        let access_token = settings
            .access_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or(TransferError::MissingToken)?;

        let api_base = Url::parse(&settings.api_base)
            .map_err(|e| TransferError::Config(format!("api_base: {e}")))?;
        let pcs_base = Url::parse(&settings.pcs_base)
            .map_err(|e| TransferError::Config(format!("pcs_base: {e}")))?;

        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(REQUEST_TIMEOUT)
            .read_timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            access_token,
            api_base,
            pcs_base,
        })
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url, TransferError> {
        base.join(path)
            .map_err(|e| TransferError::Config(format!("{base}{path}: {e}")))
    }

    /// List a remote directory
    pub async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let url = Self::endpoint(&self.api_base, FILE_ENDPOINT)?;
        let response = self
            .client
            .get(url)
            .query(&[
                ("method", "list"),
                ("access_token", self.access_token.as_str()),
                ("dir", dir),
            ])
            .send()
            .await?;

        let body: ListWire = read_json(response).await?;
        check_errno(body.errno, body.errmsg.as_deref())?;
        Ok(body.list.into_iter().map(RemoteEntry::from).collect())
    }

    /// Look up a single remote entry by absolute path
    pub async fn entry_by_path(&self, path: &str) -> Result<Option<RemoteEntry>, TransferError> {
        let (dir, name) = split_remote_path(path)?;
        let entries = match self.list_dir(dir).await {
            Ok(entries) => entries,
            // Missing parent directory means the entry is missing too
            Err(TransferError::Provider { errno: -9, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(entries.into_iter().find(|entry| entry.name == name))
    }

    /// Fetch metadata and the direct link for a file id
    pub async fn file_meta(&self, fs_id: u64) -> Result<FileMeta, TransferError> {
        let url = Self::endpoint(&self.api_base, MULTIMEDIA_ENDPOINT)?;
        let fsids = format!("[{fs_id}]");
        let response = self
            .client
            .get(url)
            .query(&[
                ("method", "filemetas"),
                ("access_token", self.access_token.as_str()),
                ("fsids", fsids.as_str()),
                ("dlink", "1"),
            ])
            .send()
            .await?;

        let body: FileMetasWire = read_json(response).await?;
        check_errno(body.errno, body.errmsg.as_deref())?;
        let meta = body
            .list
            .into_iter()
            .next()
            .ok_or_else(|| TransferError::InvalidLink(format!("unknown fs_id {fs_id}")))?;

        Ok(FileMeta {
            entry: RemoteEntry {
                fs_id: meta.fs_id,
                name: meta.filename,
                path: meta.path,
                size: meta.size,
                is_dir: meta.isdir != 0,
                modified_at: meta.server_mtime,
            },
            dlink: meta.dlink,
        })
    }

    /// Resolve a file id into a direct link, refusing directories
    pub async fn dlink_for_fs_id(&self, fs_id: u64) -> Result<(String, RemoteEntry), TransferError> {
        let meta = self.file_meta(fs_id).await?;
        if meta.entry.is_dir {
            return Err(TransferError::NotAFile(meta.entry.name));
        }
        let dlink = meta
            .dlink
            .ok_or_else(|| TransferError::MalformedResponse("filemetas returned no dlink".into()))?;
        Ok((dlink, meta.entry))
    }

    /// Resolve a remote path into a direct link
    pub async fn dlink_for_path(&self, path: &str) -> Result<(String, RemoteEntry), TransferError> {
        let entry = self
            .entry_by_path(path)
            .await?
            .ok_or_else(|| provider_error(-9, None))?;
        self.dlink_for_fs_id(entry.fs_id).await
    }

    /// Check that `link` is a direct link served by the configured download host
    pub fn validate_link(&self, link: &str) -> Result<Url, TransferError> {
        let parsed = Url::parse(link).map_err(|_| TransferError::InvalidLink(link.to_string()))?;
        let expected_prefix = format!("{}/file/", self.pcs_base.as_str().trim_end_matches('/'));
        if !link.starts_with(&expected_prefix) {
            return Err(TransferError::InvalidLink(link.to_string()));
        }
        Ok(parsed)
    }

    /// Extract the file id encoded in a direct link's `fid` parameter
    pub fn fs_id_from_link(link: &str) -> Option<u64> {
        let parsed = Url::parse(link).ok()?;
        let fid = parsed
            .query_pairs()
            .find(|(key, _)| key == "fid")
            .map(|(_, value)| value.into_owned())?;
        fid.rsplit('-').next()?.parse().ok()
    }

    fn rtype(overwrite: bool) -> &'static str {
        if overwrite {
            "3"
        } else {
            "0"
        }
    }
}

#[async_trait]
impl PanApi for PanClient {
    async fn remote_file_exists(&self, path: &str) -> Result<bool, TransferError> {
        Ok(self.entry_by_path(path).await?.is_some())
    }

    async fn precreate(
        &self,
        request: PrecreateRequest<'_>,
    ) -> Result<PrecreateResponse, TransferError> {
        let url = Self::endpoint(&self.api_base, FILE_ENDPOINT)?;
        let block_list = serde_json::to_string(request.block_list)?;
        let size = request.size.to_string();
        debug!("precreate {} ({} bytes)", request.path, request.size);

        let response = self
            .client
            .post(url)
            .query(&[
                ("method", "precreate"),
                ("access_token", self.access_token.as_str()),
            ])
            .form(&[
                ("path", request.path),
                ("isdir", "0"),
                ("size", size.as_str()),
                ("autoinit", "1"),
                ("block_list", block_list.as_str()),
                ("rtype", Self::rtype(request.overwrite)),
            ])
            .send()
            .await?;

        let body: PrecreateWire = read_json(response).await?;
        check_errno(body.errno, body.errmsg.as_deref())?;
        let upload_id = body
            .uploadid
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransferError::MalformedResponse("precreate returned no uploadid".into()))?;

        Ok(PrecreateResponse {
            upload_id,
            block_list: body.block_list,
        })
    }

    async fn upload_block(
        &self,
        request: BlockUploadRequest<'_>,
        data: Bytes,
    ) -> Result<(), TransferError> {
        let url = Self::endpoint(&self.pcs_base, SUPERFILE_ENDPOINT)?;
        let partseq = request.index.to_string();
        let len = data.len() as u64;
        let part = reqwest::multipart::Part::stream_with_length(data, len).file_name("blob");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(url)
            .query(&[
                ("method", "upload"),
                ("access_token", self.access_token.as_str()),
                ("type", "tmpfile"),
                ("path", request.path),
                ("uploadid", request.upload_id),
                ("partseq", partseq.as_str()),
            ])
            .multipart(form)
            .send()
            .await?;

        // Success carries the block md5; failures carry an error key
        let body: ErrorWire = read_json(response).await?;
        if let Some(code) = body.error_code.or(body.errno.filter(|errno| *errno != 0)) {
            return Err(provider_error(code, body.error_msg.as_deref()));
        }
        Ok(())
    }

    async fn create_file(
        &self,
        request: CreateFileRequest<'_>,
    ) -> Result<CreatedFile, TransferError> {
        let url = Self::endpoint(&self.api_base, FILE_ENDPOINT)?;
        let block_list = serde_json::to_string(request.block_list)?;
        let size = request.size.to_string();

        let response = self
            .client
            .post(url)
            .query(&[
                ("method", "create"),
                ("access_token", self.access_token.as_str()),
            ])
            .form(&[
                ("path", request.path),
                ("isdir", "0"),
                ("size", size.as_str()),
                ("uploadid", request.upload_id),
                ("block_list", block_list.as_str()),
                ("rtype", Self::rtype(request.overwrite)),
            ])
            .send()
            .await?;

        let body: CreateWire = read_json(response).await?;
        check_errno(body.errno, body.errmsg.as_deref())?;
        Ok(CreatedFile {
            fs_id: body.fs_id,
            path: body.path.unwrap_or_else(|| request.path.to_string()),
            size: body.size.unwrap_or(request.size),
        })
    }

    async fn open_range(&self, link: &str, offset: u64) -> Result<RangeResponse, TransferError> {
        let mut url = self.validate_link(link)?;
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token);

        let request = if offset > 0 {
            info!("Resuming with range bytes={}-", offset);
            self.client
                .get(url)
                .header(header::RANGE, format!("bytes={}-", offset))
        } else {
            self.client.get(url)
        };
        let response = request.send().await?;
        let status = response.status();

        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(status_error(response).await);
        }

        Ok(RangeResponse {
            status: status.as_u16(),
            content_length: response.content_length(),
            body: response.bytes_stream().map_err(TransferError::from).boxed(),
        })
    }
}

/// Split `/a/b/c.txt` into (`/a/b`, `c.txt`)
fn split_remote_path(path: &str) -> Result<(&str, &str), TransferError> {
    if !path.starts_with('/') {
        return Err(TransferError::InvalidPath(path.to_string()));
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, "")) | None => Err(TransferError::RootTarget),
        Some(("", name)) => Ok(("/", name)),
        Some((dir, name)) => Ok((dir, name)),
    }
}

fn check_errno(errno: i64, errmsg: Option<&str>) -> Result<(), TransferError> {
    if errno == 0 {
        Ok(())
    } else {
        Err(provider_error(errno, errmsg))
    }
}

/// Decode a JSON body, mapping error statuses through the provider table
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, TransferError> {
    if !response.status().is_success() {
        return Err(status_error(response).await);
    }
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

async fn status_error(response: Response) -> TransferError {
    let status = response.status().as_u16();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return TransferError::Network(e),
    };

    match serde_json::from_str::<ErrorWire>(&text) {
        Ok(body) if status < 500 => match body.error_code.or(body.errno) {
            Some(code) => provider_error(code, body.error_msg.as_deref()),
            None => TransferError::HttpStatus { status, message: text },
        },
        _ => TransferError::HttpStatus { status, message: text },
    }
}

// ============================================================================
// Wire formats
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorWire {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default)]
    errno: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PrecreateWire {
    errno: i64,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    uploadid: Option<String>,
    #[serde(default)]
    block_list: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct CreateWire {
    errno: i64,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    fs_id: u64,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListWire {
    errno: i64,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    list: Vec<EntryWire>,
}

#[derive(Debug, Deserialize)]
struct EntryWire {
    fs_id: u64,
    path: String,
    server_filename: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    isdir: u8,
    #[serde(default)]
    server_mtime: i64,
}

impl From<EntryWire> for RemoteEntry {
    fn from(wire: EntryWire) -> Self {
        RemoteEntry {
            fs_id: wire.fs_id,
            path: wire.path,
            name: wire.server_filename,
            size: wire.size,
            is_dir: wire.isdir != 0,
            modified_at: wire.server_mtime,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileMetasWire {
    errno: i64,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    list: Vec<MetaWire>,
}

#[derive(Debug, Deserialize)]
struct MetaWire {
    fs_id: u64,
    filename: String,
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    isdir: u8,
    #[serde(default)]
    server_mtime: i64,
    #[serde(default)]
    dlink: Option<String>,
}
