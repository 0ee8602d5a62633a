use regex::Regex;

use crate::config::Config;

const SENSORS_UTILITY: &str = "/usr/bin/sensors";
const KERNEL_INIT_PATTERN: &str = r"kernel: .*init:";
const STATUS_LINE_PATTERN: &str = r"^[0-9TZ:+-]+.* 10-.* STM32";
const STATUS_UTILITY_PREFIX: &str = "/usr/bin/powman";
// The formatter splits the charger status and the fuel gauge reading; glue them back
const SPLIT_STATUS_PATTERN: &str = r"BQ24620\[status=([0-9]+)[^S]*STC3115";
const SPLIT_STATUS_REPLACEMENT: &str = "BQ24620[status=${1} STC3115";
const PRIORITY_MARKER: &str = "IATA=";

pub const DEFAULT_KEEP_PATTERN: &str = r"airfi-cmd\.sh --list: IATA=|init: (SWver|HWver|HWrev|powman-ver|Box power-(up|down))|STM32\[BQ24620\[status=|STC3115\[chg=|airfi-cmd\.sh: --(shutdown|reboot)";
pub const DEFAULT_FASE_SENTINEL: &str = "airfi-cmd.sh --list: FASE='on'";
pub const DEFAULT_LEGACY_CHARGER_SENTINEL: &str = "LTC4156";

/// Compiled line rules, built once at start-up and shared by reference.
#[derive(Debug, Clone)]
pub struct TransformRules {
    pub(crate) fase_sentinel: String,
    pub(crate) legacy_charger_sentinel: String,
    pub(crate) keep: Regex,
    pub(crate) excluded_substrings: Vec<String>,
    pub(crate) excluded_patterns: Vec<Regex>,
    pub(crate) status_line: Regex,
    pub(crate) status_utility_prefix: String,
    pub(crate) split_status: Regex,
    pub(crate) priority_marker: String,
}

impl TransformRules {
    pub fn new(
        keep_pattern: &str,
        fase_sentinel: &str,
        legacy_charger_sentinel: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            fase_sentinel: fase_sentinel.to_string(),
            legacy_charger_sentinel: legacy_charger_sentinel.to_string(),
            keep: Regex::new(keep_pattern)?,
            excluded_substrings: vec![SENSORS_UTILITY.to_string()],
            excluded_patterns: vec![Regex::new(KERNEL_INIT_PATTERN)?],
            status_line: Regex::new(STATUS_LINE_PATTERN)?,
            status_utility_prefix: STATUS_UTILITY_PREFIX.to_string(),
            split_status: Regex::new(SPLIT_STATUS_PATTERN)?,
            priority_marker: PRIORITY_MARKER.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, regex::Error> {
        Self::new(
            &config.keep_pattern,
            &config.fase_sentinel,
            &config.legacy_charger_sentinel,
        )
    }

    pub(crate) fn is_excluded(&self, line: &str) -> bool {
        self.excluded_substrings.iter().any(|s| line.contains(s.as_str()))
            || self.excluded_patterns.iter().any(|re| re.is_match(line))
    }

    /// Applies the device-status rewrites. Lines that aren't status lines are returned unchanged.
    pub(crate) fn rewrite(&self, line: String) -> String {
        if !self.status_line.is_match(&line) {
            return line;
        }
        let line = self.strip_utility_prefix(line);
        if self.split_status.is_match(&line) {
            self.split_status
                .replace_all(&line, SPLIT_STATUS_REPLACEMENT)
                .into_owned()
        } else {
            line
        }
    }

    // "... /usr/bin/powman[123]:   STM32[..." becomes "... STM32[..."
    fn strip_utility_prefix(&self, line: String) -> String {
        let Some(idx) = line.find(self.status_utility_prefix.as_str()) else {
            return line;
        };
        let rest = &line[idx..];
        match rest.find(':') {
            Some(colon) => {
                let remainder = rest[colon + 1..].trim_start_matches([' ', '\t']);
                format!("{}{}", &line[..idx], remainder)
            }
            None => line,
        }
    }
}

impl Default for TransformRules {
    fn default() -> Self {
        Self::new(
            DEFAULT_KEEP_PATTERN,
            DEFAULT_FASE_SENTINEL,
            DEFAULT_LEGACY_CHARGER_SENTINEL,
        )
        .expect("built-in transform rules compile")
    }
}
