//! JUnit XML upload to a ReportPortal instance.

use std::path::Path;

use serde::Serialize;

use crate::errors::{Error, Result};

pub const ENDPOINT_ENV: &str = "RP_ENDPOINT";
pub const TOKEN_ENV: &str = "RP_TOKEN";
pub const PROJECT_ENV: &str = "RP_PROJECT";

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub endpoint: String,
    pub token: String,
    pub project: String,
    pub launch_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchImportRq {
    #[serde(skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    attributes: Vec<Attribute>,
}

#[derive(Serialize)]
struct Attribute {
    key: String,
    value: String,
}

impl ImportConfig {
    /// Fill missing fields from the `RP_*` environment variables.
    pub fn resolve(
        endpoint: Option<String>,
        token: Option<String>,
        project: Option<String>,
        launch_name: Option<String>,
        description: Option<String>,
    ) -> Result<Self> {
        let from_env = |explicit: Option<String>, var: &str, flag: &str| -> Result<String> {
            explicit
                .or_else(|| std::env::var(var).ok().filter(|v| !v.is_empty()))
                .ok_or_else(|| {
                    Error::Build(format!(
                        "{flag} is required: use the --{flag} flag or {var} environment variable"
                    ))
                })
        };
        Ok(Self {
            endpoint: from_env(endpoint, ENDPOINT_ENV, "endpoint")?,
            token: from_env(token, TOKEN_ENV, "token")?,
            project: from_env(project, PROJECT_ENV, "project")?,
            launch_name,
            description,
        })
    }

    pub fn import_url(&self) -> String {
        format!(
            "{}/api/v1/plugin/{}/junit/import",
            self.endpoint.trim_end_matches('/'),
            self.project
        )
    }
}

/// Upload a JUnit XML file; returns the server response body.
pub async fn import_junit(cfg: &ImportConfig, xml_file: &Path) -> Result<String> {
    let bytes = tokio::fs::read(xml_file)
        .await
        .map_err(|e| Error::Build(format!("cannot read {}: {e}", xml_file.display())))?;
    let file_name = xml_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "report.xml".to_string());
    let launch_name = cfg.launch_name.clone().unwrap_or_else(|| {
        xml_file
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "opsbook".to_string())
    });

    let launch_rq = LaunchImportRq {
        name: launch_name,
        description: cfg.description.clone(),
        attributes: vec![
            Attribute {
                key: "source".into(),
                value: "opsbook".into(),
            },
            Attribute {
                key: "type".into(),
                value: "junit-import".into(),
            },
        ],
    };
    let launch_json = serde_json::to_string(&launch_rq)
        .map_err(|e| Error::Build(format!("cannot serialize launch request: {e}")))?;

    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("text/xml")
                .map_err(|e| Error::Build(format!("invalid mime type: {e}")))?,
        )
        .text("launchImportRq", launch_json);

    let client = reqwest::Client::new();
    let response = client
        .post(cfg.import_url())
        .bearer_auth(&cfg.token)
        .multipart(form)
        .send()
        .await
        .map_err(|e| Error::Runner {
            kind: "reportportal upload",
            message: e.to_string(),
        })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(Error::Runner {
            kind: "reportportal upload",
            message: format!("HTTP {}: {body}", status.as_u16()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_import_url() {
        let cfg = ImportConfig {
            endpoint: "http://rp.example.com/".into(),
            token: "t".into(),
            project: "team_a".into(),
            launch_name: None,
            description: None,
        };
        assert_eq!(
            cfg.import_url(),
            "http://rp.example.com/api/v1/plugin/team_a/junit/import"
        );
    }

    #[test]
    fn resolve_requires_endpoint() {
        std::env::remove_var(ENDPOINT_ENV);
        let err = ImportConfig::resolve(None, Some("t".into()), Some("p".into()), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn launch_request_serializes_attributes() {
        let rq = LaunchImportRq {
            name: "run-1".into(),
            description: None,
            attributes: vec![Attribute {
                key: "source".into(),
                value: "opsbook".into(),
            }],
        };
        let json = serde_json::to_string(&rq).unwrap();
        assert!(json.contains(r#""name":"run-1""#));
        assert!(json.contains(r#""key":"source""#));
        assert!(!json.contains("description"));
    }
}
