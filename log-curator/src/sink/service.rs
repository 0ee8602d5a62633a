// Known services, checked in order. A line matches when it contains the marker
// anywhere; only a leading `strip` prefix is removed from the message.
struct ServiceRule {
    marker: &'static str,
    service: &'static str,
    strip: Option<&'static str>,
}

const SERVICE_RULES: [ServiceRule; 4] = [
    ServiceRule {
        marker: "init:",
        service: "init",
        strip: Some("init: "),
    },
    ServiceRule {
        marker: "STM32[",
        service: "STM32",
        strip: None,
    },
    ServiceRule {
        marker: "airfi-cmd.sh",
        service: "airfi-cmd.sh",
        strip: Some("airfi-cmd.sh "),
    },
    ServiceRule {
        marker: "powman-ver:",
        service: "powman",
        strip: Some("powman-ver: "),
    },
];

const MAX_SERVICE_NAME_LEN: usize = 50;
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Splits the remainder of a log line into `(service_name, message)`.
pub fn split_service(remainder: &str) -> (String, String) {
    if let Some(rule) = SERVICE_RULES.iter().find(|r| remainder.contains(r.marker)) {
        let message = match rule.strip.and_then(|p| remainder.strip_prefix(p)) {
            Some(rest) => rest.trim().to_string(),
            None => remainder.to_string(),
        };
        return (rule.service.to_string(), message);
    }

    match leading_service_name(remainder) {
        Some(name) => {
            let prefix = format!("{name}: ");
            let message = match remainder.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.trim().to_string(),
                None => remainder.to_string(),
            };
            (name.to_string(), message)
        }
        None => (UNKNOWN_SERVICE.to_string(), remainder.to_string()),
    }
}

// "dnsmasq[12]: query" -> "dnsmasq[12]"
fn leading_service_name(remainder: &str) -> Option<&str> {
    let colon = remainder.find(':')?;
    if colon == 0 || colon >= MAX_SERVICE_NAME_LEN {
        return None;
    }
    let name = remainder[..colon].trim();
    (!name.is_empty()).then_some(name)
}
