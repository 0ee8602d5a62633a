use std::sync::Arc;

use anyhow::{Context, Error};
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::Client as AwsS3SdkClient;
use common_mongo::{DocumentStore, MongoImpl};
use common_s3::{S3Client, S3Impl};
use tracing::info;

use crate::classify::Classifier;
use crate::config::Config;
use crate::transform::TransformRules;

/// Everything a job needs, built once at start-up and shared by reference.
pub struct AppContext {
    pub config: Config,
    pub s3: Arc<dyn S3Client>,
    pub store: Arc<dyn DocumentStore>,
    pub rules: Arc<TransformRules>,
    pub classifier: Classifier,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, Error> {
        let aws_config = load_aws_config(config).await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &config.s3_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.s3_force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }
        let s3: Arc<dyn S3Client> = Arc::new(S3Impl::new(AwsS3SdkClient::from_conf(
            s3_config_builder.build(),
        )));

        let mongo = MongoImpl::connect(&config.mongo_uri, &config.mongo_database)
            .await
            .context("failed to create document store client")?;
        mongo
            .ping()
            .await
            .context("document store did not answer ping")?;
        info!(database = %config.mongo_database, "connected to document store");

        Self::with_clients(config, s3, Arc::new(mongo))
    }

    /// Builds a context around existing clients, compiling the rule set from `config`.
    pub fn with_clients(
        config: &Config,
        s3: Arc<dyn S3Client>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let rules = TransformRules::from_config(config).context("invalid KEEP_PATTERN")?;
        let classifier = Classifier::new(config.classifier_sample_size)?;

        Ok(Self {
            config: config.clone(),
            s3,
            store,
            rules: Arc::new(rules),
            classifier,
        })
    }
}

/// Shared AWS settings for the S3 and SQS clients. The S3 endpoint override is
/// applied to the S3 client only.
pub async fn load_aws_config(config: &Config) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await
}
