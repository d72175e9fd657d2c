//! Listing of local data images with their running state.

use std::collections::BTreeMap;

use d2_core::{D2Result, DATA_REPOSITORY};
use serde::Serialize;

use crate::docker::Docker;
use crate::status::gateway_port;

const VOID_TAG: &str = "<none>";
const SEPARATOR: &str = " | ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageListing {
    pub name: String,
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_path: Option<String>,
}

impl ImageListing {
    pub fn status(&self) -> &'static str {
        if self.port.is_some() { "RUNNING" } else { "STOPPED" }
    }

    /// `NAME RUNNING[port=8080,deploy_path=/dhis2]` or `NAME STOPPED`.
    pub fn description(&self) -> String {
        let extra: Vec<String> = self
            .port
            .map(|port| format!("port={port}"))
            .into_iter()
            .chain(self.deploy_path.as_ref().map(|p| format!("deploy_path={p}")))
            .collect();

        if extra.is_empty() {
            format!("{} {}", self.name, self.status())
        } else {
            format!("{} {}[{}]", self.name, self.status(), extra.join(","))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunningInfo {
    port: u16,
    deploy_path: Option<String>,
}

/// `{image: (port, deploy_path)}` from `LABEL | PORTS [| DEPLOY_PATH]` rows.
fn parse_running(lines: &[&str]) -> BTreeMap<String, RunningInfo> {
    let mut running = BTreeMap::new();
    for line in lines {
        let parts: Vec<&str> = line.split(SEPARATOR).map(str::trim).collect();
        let (image, ports, deploy_path) = match parts.as_slice() {
            [image, ports] => (*image, *ports, ""),
            [image, ports, deploy_path] => (*image, *ports, *deploy_path),
            _ => continue,
        };
        if let Some(port) = gateway_port(ports) {
            running.insert(
                image.to_string(),
                RunningInfo {
                    port,
                    deploy_path: Some(deploy_path)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string),
                },
            );
        }
    }
    running
}

/// Build listings from `docker image ls` pairs and running rows.
fn build_listings(
    images: &[(String, String)],
    running: &BTreeMap<String, RunningInfo>,
) -> Vec<ImageListing> {
    let mut listings: Vec<ImageListing> = images
        .iter()
        .filter(|(repo, tag)| !repo.contains(VOID_TAG) && !tag.contains(VOID_TAG))
        .filter(|(repo, _)| repo.contains(DATA_REPOSITORY))
        .map(|(repo, tag)| {
            let name = format!("{repo}:{tag}");
            let info = running.get(&name);
            ImageListing {
                port: info.map(|i| i.port),
                deploy_path: info.and_then(|i| i.deploy_path.clone()),
                name,
            }
        })
        .collect();

    listings.sort_by(|a, b| {
        (a.port.unwrap_or(u16::MAX), &a.name).cmp(&(b.port.unwrap_or(u16::MAX), &b.name))
    });
    listings
}

impl Docker {
    /// Every local data image, running ones first (by port), then by name.
    pub async fn list_data_images(&self) -> D2Result<Vec<ImageListing>> {
        let format = [
            format!("{{{{.Label \"{}\"}}}}", self.label()),
            "{{.Ports}}".to_string(),
            format!("{{{{.Label \"{}\"}}}}", self.deploy_path_label()),
        ]
        .join(SEPARATOR);
        let output = self.ps_labeled(&format).await?;
        let lines: Vec<&str> = output.lines().collect();
        let running = parse_running(&lines);

        let images = self.list_images().await?;
        Ok(build_listings(&images, &running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(r, t)| (r.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_running_keeps_gateway_rows() {
        let running = parse_running(&[
            "org/dhis2-data:2.34 | 0.0.0.0:8081->80/tcp | /dhis2",
            "org/dhis2-data:2.34 | 8080/tcp | /dhis2",
            "org/dhis2-data:2.35 | 0.0.0.0:8082->80/tcp",
            "garbage",
        ]);
        assert_eq!(running.len(), 2);
        assert_eq!(running["org/dhis2-data:2.34"].port, 8081);
        assert_eq!(running["org/dhis2-data:2.34"].deploy_path.as_deref(), Some("/dhis2"));
        assert_eq!(running["org/dhis2-data:2.35"].deploy_path, None);
    }

    #[test]
    fn test_listings_sorted_running_first() {
        let images = pairs(&[
            ("org/dhis2-data", "2.30"),
            ("org/dhis2-data", "2.36"),
            ("org/dhis2-core", "2.36"),
            ("<none>", "<none>"),
            ("org/dhis2-data", "2.34"),
        ]);
        let running = parse_running(&[
            "org/dhis2-data:2.36 | 0.0.0.0:8081->80/tcp",
            "org/dhis2-data:2.34 | 0.0.0.0:8085->80/tcp | /dhis2",
        ]);

        let listings = build_listings(&images, &running);
        let descriptions: Vec<String> = listings.iter().map(ImageListing::description).collect();
        assert_eq!(
            descriptions,
            vec![
                "org/dhis2-data:2.36 RUNNING[port=8081]",
                "org/dhis2-data:2.34 RUNNING[port=8085,deploy_path=/dhis2]",
                "org/dhis2-data:2.30 STOPPED",
            ]
        );
    }
}
