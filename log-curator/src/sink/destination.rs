use crate::classify::LogType;

const ARCHIVE_SUFFIX: &str = ".gz";
// Stripped in this order, so an already-typed name isn't typed twice
const TYPED_PREFIXES: [&str; 3] = ["logfile-airfi-", "logfile-maintenance-", "logfile-"];

/// Object key of the curated artifact for `source_key`. Pure function of its inputs.
pub fn destination_key(year: i32, device_id: &str, source_key: &str, log_type: LogType) -> String {
    let filename = source_key.rsplit('/').next().unwrap_or(source_key);
    let base = filename.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(filename);

    let filename = match log_type {
        LogType::Inconclusive => format!("{base}_STM_LOG.txt"),
        LogType::Airfi | LogType::Maintenance => {
            let cleaned = TYPED_PREFIXES
                .iter()
                .fold(base, |name, prefix| name.strip_prefix(prefix).unwrap_or(name));
            format!("logfile-{}-{}-STM_LOG.txt", log_type.label(), cleaned)
        }
    };

    format!("logs/{year}/{device_id}/{filename}")
}
