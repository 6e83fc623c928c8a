use config::{Config, File};
use miette::{IntoDiagnostic, Result};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Default, Deserialize)]
pub struct Cfg {
    #[serde(default)]
    pub log: CfgLog,
    pub sign: Option<CfgSign>,
    pub verify: Option<CfgVerify>,
}

#[derive(Debug, Deserialize)]
pub struct CfgLog {
    /// Default filter directive, `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for CfgLog {
    fn default() -> Self {
        CfgLog {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Default, Deserialize)]
pub struct CfgSign {
    #[serde(default)]
    pub domains: Vec<CfgDKIM>,
}

#[derive(Debug, Deserialize)]
pub struct CfgVerify {
    pub hostname: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CfgDKIM {
    pub domain: String,
    pub selector: String,
    pub private_key: String,
    #[serde(default)]
    pub key_type: DkimKeyType,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DkimKeyType {
    #[default]
    Rsa,
    Ed25519,
}

/// Parses the `domain:selector:key_path` form accepted on the command line.
/// Keys given this way are RSA keys.
impl FromStr for CfgDKIM {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.splitn(3, ':').collect::<Vec<_>>()[..] {
            [domain, selector, private_key]
                if !domain.is_empty() && !selector.is_empty() && !private_key.is_empty() =>
            {
                Ok(CfgDKIM {
                    domain: domain.to_string(),
                    selector: selector.to_string(),
                    private_key: private_key.to_string(),
                    key_type: DkimKeyType::Rsa,
                })
            }
            _ => Err(format!("expected domain:selector:key_path, got '{s}'")),
        }
    }
}

impl Cfg {
    pub fn load(cfg_path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(cfg_path))
            .build()
            .into_diagnostic()?;

        let cfg: Cfg = settings.try_deserialize().into_diagnostic()?;

        Ok(cfg)
    }
}
