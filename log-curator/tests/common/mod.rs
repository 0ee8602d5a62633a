#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use common_mongo::MockDocumentStore;
use common_s3::{MockObject, MockS3Client};
use envconfig::Envconfig;
use flate2::{write::GzEncoder, Compression};
use log_curator::config::Config;
use log_curator::context::AppContext;
use log_curator::pipeline::Pipeline;

pub const SOURCE_BUCKET: &str = "airserver-backups";
pub const DESTINATION_BUCKET: &str = "airserver-logs-processed";
pub const DEVICE: &str = "10.0.10.101";

pub fn gzip(lines: &[String]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap()
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

pub fn source_key(name: &str) -> String {
    format!("logs/{DEVICE}/{name}")
}

/// A charger status line as the device writes it, before the status rewrite.
pub fn status_line(second: u32, current_ma: i32) -> String {
    format!(
        "2025-10-03T08:01:{second:02}Z 10-0-10-101 /usr/bin/powman[812]: STM32[BQ24620[status=1] cur={current_ma} mA STC3115[chg={}]",
        50 + second
    )
}

/// An archive with `negative` discharging and `positive` charging readings,
/// plus a version line, an IATA listing and a line the filter drops.
pub fn archive_lines(negative: u32, positive: u32) -> Vec<String> {
    let mut lines = vec![format!("2025-10-03T08:00:00Z {DEVICE} init: SWver 4.2")];
    for i in 0..negative {
        lines.push(status_line(i, -120));
    }
    for i in negative..negative + positive {
        lines.push(status_line(i, 300));
    }
    lines.push(format!("2025-10-03T08:02:00Z {DEVICE} airfi-cmd.sh --list: IATA=LHR"));
    lines.push(format!("2025-10-03T08:03:00Z {DEVICE} dnsmasq: query A"));
    lines
}

pub fn archive(lines: &[String], last_modified: DateTime<Utc>) -> MockObject {
    MockObject::new(gzip(lines), last_modified)
}

pub fn config() -> Config {
    Config::init_from_hashmap(&HashMap::new()).unwrap()
}

pub fn pipeline(s3: &MockS3Client, store: &MockDocumentStore) -> Pipeline {
    let context = AppContext::with_clients(
        &config(),
        Arc::new(s3.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();
    Pipeline::new(Arc::new(context))
}

pub fn october_job() -> log_curator::job::Job {
    log_curator::job::Job::parse(&format!(
        r#"{{"deviceId":"{DEVICE}","startDate":"102025","endDate":"102025"}}"#
    ))
    .unwrap()
}
