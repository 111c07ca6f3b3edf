// pg-s3-backup/src/backup/s3_upload.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::{ByteStream, DateTime as S3DateTime, Length};
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::S3Config;
use crate::errors::{BackupError, Result};

/// Default multipart chunk; S3 requires at least 5 MiB for all but the last part.
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;
pub const MAX_PARTS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub key: String,
    pub path: PathBuf,
    pub expires: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<()>;
}

/// Uploads archives to an S3 or S3-compatible bucket.
pub struct S3Uploader {
    client: s3::Client,
    bucket_name: String,
    part_size: u64,
}

impl S3Uploader {
    pub async fn from_config(s3_config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
        if let Some(region) = &s3_config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &s3_config.endpoint_url {
            info!("Using custom endpoint: {}", endpoint);
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let client_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(s3_config.force_path_style)
            .build();

        S3Uploader {
            client: s3::Client::from_conf(client_config),
            bucket_name: s3_config.bucket_name.clone(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    async fn put_single(&self, request: &UploadRequest, expires: S3DateTime) -> Result<()> {
        let body = ByteStream::from_path(&request.path).await.map_err(|e| {
            BackupError::Upload(format!(
                "Failed to read {} for upload: {}",
                request.path.display(),
                e
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&request.key)
            .body(body)
            .expires(expires)
            .send()
            .await
            .map_err(|e| {
                BackupError::Upload(format!(
                    "PutObject {} failed: {}",
                    request.key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        request: &UploadRequest,
        expires: S3DateTime,
        file_size: u64,
    ) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket_name)
            .key(&request.key)
            .expires(expires)
            .send()
            .await
            .map_err(|e| {
                BackupError::Upload(format!(
                    "CreateMultipartUpload {} failed: {}",
                    request.key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| BackupError::Upload("S3 returned no multipart upload id".to_string()))?
            .to_string();

        match self.upload_parts(request, &upload_id, file_size).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                let completion = self
                    .client
                    .complete_multipart_upload()
                    .bucket(&self.bucket_name)
                    .key(&request.key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await;
                if let Err(e) = completion {
                    let err = BackupError::Upload(format!(
                        "CompleteMultipartUpload {} failed: {}",
                        request.key,
                        DisplayErrorContext(&e)
                    ));
                    self.abort(&request.key, &upload_id).await;
                    return Err(err);
                }
                Ok(())
            }
            Err(err) => {
                self.abort(&request.key, &upload_id).await;
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        request: &UploadRequest,
        upload_id: &str,
        file_size: u64,
    ) -> Result<Vec<CompletedPart>> {
        let part_size = part_size_for(file_size, self.part_size);
        let mut parts = Vec::new();

        for (index, (offset, length)) in part_ranges(file_size, part_size).into_iter().enumerate() {
            let part_number = (index + 1) as i32;

            // Stream each part straight from disk
            let body = ByteStream::read_from()
                .path(&request.path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| {
                    BackupError::Upload(format!(
                        "Failed to read part {} of {}: {}",
                        part_number,
                        request.path.display(),
                        e
                    ))
                })?;

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket_name)
                .key(&request.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(|e| {
                    BackupError::Upload(format!(
                        "UploadPart {} of {} failed: {}",
                        part_number,
                        request.key,
                        DisplayErrorContext(&e)
                    ))
                })?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
        }

        Ok(parts)
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(
                "Failed to abort multipart upload {} for {}: {}",
                upload_id,
                key,
                DisplayErrorContext(&e)
            );
        }
    }
}

#[async_trait]
impl ObjectUploader for S3Uploader {
    async fn upload(&self, request: &UploadRequest) -> Result<()> {
        info!(
            "Uploading {} to S3 bucket {} with key {}",
            request.path.display(),
            self.bucket_name,
            request.key
        );

        let file_size = file_size(&request.path).await?;
        let expires = S3DateTime::from_millis(request.expires.timestamp_millis());

        if file_size <= self.part_size {
            self.put_single(request, expires).await?;
        } else {
            self.put_multipart(request, expires, file_size).await?;
        }

        info!(
            "Backup uploaded to s3://{}/{} (expires {})",
            self.bucket_name,
            request.key,
            request.expires.to_rfc3339()
        );
        Ok(())
    }
}

async fn file_size(path: &Path) -> Result<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|e| BackupError::io(format!("Failed to stat {}", path.display()), e))
}

/// Grows the part size so a file never needs more than `MAX_PARTS` parts.
pub fn part_size_for(file_size: u64, preferred: u64) -> u64 {
    let minimum = file_size.div_ceil(MAX_PARTS);
    preferred.max(minimum).max(1)
}

/// `(offset, length)` of every part; the last one carries the remainder.
pub fn part_ranges(file_size: u64, part_size: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset < file_size {
        let length = part_size.min(file_size - offset);
        ranges.push((offset, length));
        offset += length;
    }
    ranges
}
