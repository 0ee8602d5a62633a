use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    // Raw device archives, laid out as logs/<device>/...
    #[envconfig(from = "SOURCE_BUCKET", default = "airserver-backups")]
    pub source_bucket: String,

    #[envconfig(from = "DESTINATION_BUCKET", default = "airserver-logs-processed")]
    pub destination_bucket: String,

    // Literal every archive filename must contain to be considered
    #[envconfig(from = "ARCHIVE_NAME_MARKER", default = "logfile-")]
    pub archive_name_marker: String,

    #[envconfig(from = "AWS_REGION", default = "eu-west-1")]
    pub aws_region: String,

    // Set for MinIO / LocalStack
    #[envconfig(from = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[envconfig(from = "S3_FORCE_PATH_STYLE", default = "false")]
    pub s3_force_path_style: bool,

    #[envconfig(from = "MONGO_URI", default = "mongodb://localhost:27017")]
    pub mongo_uri: String,

    #[envconfig(from = "MONGO_DATABASE", default = "airserver_logs")]
    pub mongo_database: String,

    #[envconfig(from = "INSERT_BATCH_SIZE", default = "1000")]
    pub insert_batch_size: usize,

    // Number of current readings sampled to classify an archive
    #[envconfig(from = "CLASSIFIER_SAMPLE_SIZE", default = "10")]
    pub classifier_sample_size: usize,

    #[envconfig(
        from = "KEEP_PATTERN",
        default = "airfi-cmd\\.sh --list: IATA=|init: (SWver|HWver|HWrev|powman-ver|Box power-(up|down))|STM32\\[BQ24620\\[status=|STC3115\\[chg=|airfi-cmd\\.sh: --(shutdown|reboot)"
    )]
    pub keep_pattern: String,

    #[envconfig(from = "FASE_SENTINEL", default = "airfi-cmd.sh --list: FASE='on'")]
    pub fase_sentinel: String,

    #[envconfig(from = "LEGACY_CHARGER_SENTINEL", default = "LTC4156")]
    pub legacy_charger_sentinel: String,

    #[envconfig(from = "SQS_QUEUE_URL")]
    pub sqs_queue_url: Option<String>,

    // Long polling, SQS caps this at 20
    #[envconfig(from = "SQS_WAIT_TIME_SECONDS", default = "20")]
    pub sqs_wait_time_seconds: i32,

    // SQS caps this at 10
    #[envconfig(from = "SQS_MAX_MESSAGES", default = "10")]
    pub sqs_max_messages: i32,
}

impl Config {
    /// Rejects values the pipeline can't run with. Called once at start-up.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.insert_batch_size == 0 {
            anyhow::bail!("INSERT_BATCH_SIZE must be greater than zero");
        }
        if self.classifier_sample_size == 0 {
            anyhow::bail!("CLASSIFIER_SAMPLE_SIZE must be greater than zero");
        }
        if self.fase_sentinel.is_empty() || self.legacy_charger_sentinel.is_empty() {
            anyhow::bail!("sentinel markers must not be empty");
        }
        if !(1..=10).contains(&self.sqs_max_messages) {
            anyhow::bail!("SQS_MAX_MESSAGES must be between 1 and 10");
        }
        if !(0..=20).contains(&self.sqs_wait_time_seconds) {
            anyhow::bail!("SQS_WAIT_TIME_SECONDS must be between 0 and 20");
        }
        Ok(())
    }
}
