//! Object storage URL resolution for retrieved images

use crate::config::StorageConfig;

/// Resolves an object key to a URL the model provider can fetch
pub trait ObjectStorage: Send + Sync {
    fn resolve_url(&self, key: &str) -> String;
}

/// Public S3 virtual-hosted URLs, or a configured base URL
#[derive(Debug, Clone)]
pub struct S3UrlResolver {
    base: String,
}

impl S3UrlResolver {
    pub fn new(config: &StorageConfig) -> Self {
        let base = match &config.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
        };
        Self { base }
    }
}

impl ObjectStorage for S3UrlResolver {
    fn resolve_url(&self, key: &str) -> String {
        format!("{}/{}", self.base, key.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_url() {
        let resolver = S3UrlResolver::new(&StorageConfig::default());
        assert_eq!(
            resolver.resolve_url("user_1/doc/page-2.png"),
            "https://flowllm-bucket.s3.us-east-1.amazonaws.com/user_1/doc/page-2.png"
        );
    }

    #[test]
    fn test_base_override() {
        let resolver = S3UrlResolver::new(&StorageConfig {
            public_base_url: Some("http://localhost:9000/files/".into()),
            ..Default::default()
        });
        assert_eq!(resolver.resolve_url("/a.png"), "http://localhost:9000/files/a.png");
    }
}
