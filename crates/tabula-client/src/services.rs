//! TCP service name lookup.
//!
//! Names are resolved against the platform services database. When that
//! file is missing or does not list the name, a small table of well-known
//! services is consulted instead.

use std::collections::HashMap;
use std::fs;

use once_cell::sync::Lazy;

const SERVICES_PATH: &str = "/etc/services";

const WELL_KNOWN: &[(&str, u16)] = &[
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("domain", 53),
    ("http", 80),
    ("pop3", 110),
    ("imap", 143),
    ("https", 443),
    ("ms-sql-s", 1433),
    ("mysql", 3306),
    ("postgresql", 5432),
];

static SERVICES: Lazy<HashMap<String, u16>> = Lazy::new(load_services);

fn load_services() -> HashMap<String, u16> {
    match fs::read_to_string(SERVICES_PATH) {
        Ok(text) => parse_services(&text),
        Err(e) => {
            tracing::debug!(path = SERVICES_PATH, error = %e, "services database unavailable");
            HashMap::new()
        }
    }
}

/// Port number of a TCP service, by name or alias.
#[must_use]
pub fn lookup_tcp_service(name: &str) -> Option<u16> {
    SERVICES.get(name).copied().or_else(|| {
        WELL_KNOWN
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, port)| *port)
    })
}

/// Parse `services(5)` text, keeping the TCP entries.
///
/// The first entry for a name wins, matching the C library's lookup order.
#[must_use]
pub fn parse_services(text: &str) -> HashMap<String, u16> {
    let mut services = HashMap::new();

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        if proto != "tcp" {
            continue;
        }
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };

        for alias in std::iter::once(name).chain(fields) {
            services.entry(alias.to_owned()).or_insert(port);
        }
    }

    services
}
