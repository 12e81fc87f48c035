//! `#cloud-config` rendering
//!
//! The document writes every assembled file, installs RKE2 (online through
//! the install script or from pre-staged artifacts), starts the service and
//! drops the Cluster API bootstrap sentinel.

use crds::{File, Ntp};
use serde::Serialize;

use crate::error::Rke2Error;
use crate::{DEFAULT_FILE_OWNER, DEFAULT_FILE_PERMISSIONS};

pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config\n";
pub const SENTINEL_FILE: &str = "/run/cluster-api/bootstrap-success.complete";
pub const INSTALL_SCRIPT_URL: &str = "https://get.rke2.io";
/// Location of pre-staged install script and artifacts on air-gapped images
pub const AIRGAP_ARTIFACT_PATH: &str = "/opt/rke2-artifacts";

/// RKE2 service started on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Server,
    Agent,
}

impl ServiceKind {
    pub fn install_type(self) -> &'static str {
        match self {
            ServiceKind::Server => "server",
            ServiceKind::Agent => "agent",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            ServiceKind::Server => "rke2-server.service",
            ServiceKind::Agent => "rke2-agent.service",
        }
    }
}

/// Everything a node needs beyond its files
#[derive(Debug, Clone)]
pub struct CloudInitInput<'a> {
    pub service: ServiceKind,
    pub files: &'a [File],
    pub pre_commands: &'a [String],
    pub post_commands: &'a [String],
    pub version: Option<&'a str>,
    pub air_gapped: bool,
    pub ntp: Option<&'a Ntp>,
}

#[derive(Debug, Serialize)]
struct CloudConfig<'a> {
    write_files: Vec<WriteFile<'a>>,
    runcmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ntp: Option<NtpConfig>,
}

#[derive(Debug, Serialize)]
struct WriteFile<'a> {
    path: &'a str,
    content: &'a str,
    owner: &'a str,
    permissions: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct NtpConfig {
    enabled: bool,
    servers: Vec<String>,
}

/// Render the cloud-config document
pub fn render(input: &CloudInitInput<'_>) -> Result<Vec<u8>, Rke2Error> {
    let write_files = input
        .files
        .iter()
        .map(|file| WriteFile {
            path: &file.path,
            content: &file.content,
            owner: file.owner.as_deref().unwrap_or(DEFAULT_FILE_OWNER),
            permissions: file.permissions.as_deref().unwrap_or(DEFAULT_FILE_PERMISSIONS),
            encoding: file.encoding.map(|e| e.cloud_init_name()),
        })
        .collect();

    let mut runcmd: Vec<String> = input.pre_commands.to_vec();
    runcmd.push(install_command(input));
    runcmd.push(format!("systemctl enable {}", input.service.unit()));
    runcmd.push(format!("systemctl start {}", input.service.unit()));
    runcmd.extend(input.post_commands.iter().cloned());
    runcmd.push(format!(
        "mkdir -p /run/cluster-api && echo success > {}",
        SENTINEL_FILE
    ));

    let ntp = input
        .ntp
        .filter(|ntp| ntp.enabled.unwrap_or(true) && !ntp.servers.is_empty())
        .map(|ntp| NtpConfig {
            enabled: true,
            servers: ntp.servers.clone(),
        });

    let document = CloudConfig { write_files, runcmd, ntp };
    let mut output = CLOUD_CONFIG_HEADER.to_string();
    output.push_str(&serde_yaml::to_string(&document)?);
    Ok(output.into_bytes())
}

fn install_command(input: &CloudInitInput<'_>) -> String {
    let mut env = Vec::new();
    if let Some(version) = input.version.filter(|v| !v.is_empty()) {
        env.push(format!("INSTALL_RKE2_VERSION={}", version));
    }
    env.push(format!("INSTALL_RKE2_TYPE={}", input.service.install_type()));

    if input.air_gapped {
        env.push(format!("INSTALL_RKE2_ARTIFACT_PATH={}", AIRGAP_ARTIFACT_PATH));
        format!("{} sh {}/install.sh", env.join(" "), AIRGAP_ARTIFACT_PATH)
    } else {
        format!("curl -sfL {} | {} sh -s -", INSTALL_SCRIPT_URL, env.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::FileEncoding;

    fn render_str(input: &CloudInitInput<'_>) -> String {
        String::from_utf8(render(input).expect("renders")).expect("utf8")
    }

    #[test]
    fn test_runcmd_order_and_header() {
        let files = vec![File {
            path: "/etc/motd".to_string(),
            content: "hello".to_string(),
            encoding: Some(FileEncoding::Base64),
            ..Default::default()
        }];
        let pre = vec!["echo pre".to_string()];
        let post = vec!["echo post".to_string()];
        let output = render_str(&CloudInitInput {
            service: ServiceKind::Server,
            files: &files,
            pre_commands: &pre,
            post_commands: &post,
            version: Some("v1.30.4+rke2r1"),
            air_gapped: false,
            ntp: None,
        });

        assert!(output.starts_with("#cloud-config\n"));
        assert!(output.contains("encoding: b64"));
        assert!(output.contains("root:root"));
        assert!(!output.contains("ntp:"));

        let pre_at = output.find("echo pre").expect("pre");
        let install_at = output.find("INSTALL_RKE2_VERSION=v1.30.4+rke2r1").expect("install");
        let start_at = output.find("systemctl start rke2-server.service").expect("start");
        let post_at = output.find("echo post").expect("post");
        let sentinel_at = output.find(SENTINEL_FILE).expect("sentinel");
        assert!(pre_at < install_at && install_at < start_at && start_at < post_at && post_at < sentinel_at);
    }

    #[test]
    fn test_air_gapped_agent_install() {
        let servers = vec!["pool.ntp.org".to_string()];
        let ntp = Ntp { enabled: None, servers };
        let output = render_str(&CloudInitInput {
            service: ServiceKind::Agent,
            files: &[],
            pre_commands: &[],
            post_commands: &[],
            version: None,
            air_gapped: true,
            ntp: Some(&ntp),
        });

        assert!(!output.contains(INSTALL_SCRIPT_URL));
        assert!(output.contains("INSTALL_RKE2_ARTIFACT_PATH=/opt/rke2-artifacts"));
        assert!(output.contains("INSTALL_RKE2_TYPE=agent"));
        assert!(output.contains("systemctl enable rke2-agent.service"));
        assert!(output.contains("pool.ntp.org"));
    }
}
