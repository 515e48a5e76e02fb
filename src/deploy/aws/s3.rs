use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Region, http::HttpResponse},
    error::{DisplayErrorContext, SdkError},
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use chrono::DateTime;
use tracing::{debug, info};

use crate::{job, model::ObjectRef, retry::Transient};

/// Region where S3 rejects an explicit location constraint.
const DEFAULT_REGION: &str = "us-east-1";

pub struct Client {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to list s3://{bucket}/{prefix}: {message}")]
    List {
        bucket: String,
        prefix: String,
        message: String,
        transient: bool,
    },
    #[error("Failed to get s3://{bucket}/{key}: {message}")]
    Get {
        bucket: String,
        key: String,
        message: String,
        transient: bool,
    },
    #[error("Failed to read body of s3://{bucket}/{key}: {message}")]
    Body {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("Failed to check bucket {bucket}: {message}")]
    HeadBucket { bucket: String, message: String },
    #[error("Failed to create bucket {bucket}: {message}")]
    CreateBucket { bucket: String, message: String },
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::List { transient, .. } | Error::Get { transient, .. } => *transient,
            Error::Body { .. } => true,
            Error::HeadBucket { .. } | Error::CreateBucket { .. } => false,
        }
    }
}

fn is_transient_sdk<E>(error: &SdkError<E, HttpResponse>) -> bool {
    match error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            status == 429 || status >= 500
        }
        _ => false,
    }
}

impl Client {
    /// Credentials come from the default AWS provider chain.
    pub async fn new(bucket: String, region: Option<String>, endpoint: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        // S3-compatible endpoints (MinIO, R2, ...) generally want path-style URLs.
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(endpoint.is_some())
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket,
            region,
        }
    }

    /// Create the bucket when `HeadBucket` reports it missing.
    pub async fn ensure_bucket(&self) -> Result<(), Error> {
        let bucket = &self.bucket;
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket, "bucket exists");
                return Ok(());
            }
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|error| error.is_not_found()) => {}
            Err(error) => {
                return Err(Error::HeadBucket {
                    bucket: bucket.clone(),
                    message: DisplayErrorContext(&error).to_string(),
                });
            }
        }
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(region) = self.region.as_deref().filter(|r| *r != DEFAULT_REGION) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|error| Error::CreateBucket {
                bucket: bucket.clone(),
                message: DisplayErrorContext(&error).to_string(),
            })?;
        info!(bucket, "created bucket");
        Ok(())
    }
}

impl job::storage::objstore::Client for Client {
    type Error = Error;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>, Self::Error> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|error| Error::List {
                bucket: self.bucket.clone(),
                prefix: prefix.to_string(),
                transient: is_transient_sdk(&error),
                message: DisplayErrorContext(&error).to_string(),
            })?;
            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                objects.push(ObjectRef {
                    path: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|time| DateTime::from_timestamp(time.secs(), time.subsec_nanos())),
                });
            }
        }
        debug!(bucket = self.bucket, prefix, count = objects.len(), "listed bucket");
        Ok(objects)
    }

    async fn get(&self, path: &str) -> Result<bytes::Bytes, Self::Error> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|error| Error::Get {
                bucket: self.bucket.clone(),
                key: path.to_string(),
                transient: is_transient_sdk(&error),
                message: DisplayErrorContext(&error).to_string(),
            })?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|error| Error::Body {
                bucket: self.bucket.clone(),
                key: path.to_string(),
                message: error.to_string(),
            })?;
        Ok(body.into_bytes())
    }
}
