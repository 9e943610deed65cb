// # Command IP Source
//
// This crate provides an IP source that runs a local shell command and takes
// the first address of the source's family from its combined output.
//
// ## Shell Selection
//
// - Windows: `powershell -Command <cmd>`
// - Elsewhere: `bash -c <cmd>` when bash is on the PATH, `sh -c <cmd>` otherwise
//
// ## Environment
//
// When a DNS-server override is installed (see `ddns_core::net`), the command
// sees it in `DDNS_DNS_SERVER`, so scripts calling `dig`/`nslookup` can use
// the same server as the daemon.

use ddns_core::ProviderRegistry;
use ddns_core::config::IpSourceConfig;
use ddns_core::net::{DNS_SERVER_ENV, dns_server_override};
use ddns_core::traits::{IpSource, IpSourceFactory, IpVersion, find_address};
use ddns_core::{Error, Result};

use std::net::IpAddr;
use std::path::Path;
use tokio::process::Command;

/// Command-based IP source
#[derive(Debug, Clone)]
pub struct CommandIpSource {
    cmd: String,
    version: IpVersion,
}

impl CommandIpSource {
    pub fn new(cmd: impl Into<String>, version: IpVersion) -> Self {
        Self {
            cmd: cmd.into(),
            version,
        }
    }

    fn command(&self) -> Command {
        let (program, flag) = shell();
        let mut command = Command::new(program);
        command.arg(flag).arg(&self.cmd).kill_on_drop(true);
        if let Some(server) = dns_server_override() {
            command.env(DNS_SERVER_ENV, server);
        }
        command
    }
}

#[async_trait::async_trait]
impl IpSource for CommandIpSource {
    async fn current(&self) -> Result<IpAddr> {
        let output = self.command().output().await.map_err(|e| {
            Error::ip_source(format!("Failed to execute command {:?}: {}", self.cmd, e))
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::ip_source(format!(
                "Command {:?} exited with {}: {:?}",
                self.cmd,
                output.status,
                combined.trim()
            )));
        }

        match find_address(&combined, self.version) {
            Some(ip) => Ok(ip),
            None => {
                tracing::debug!("Command {:?} printed no {} address: {:?}", self.cmd, self.version, combined);
                Err(Error::ip_source(format!(
                    "No {} address in the output of {:?}",
                    self.version, self.cmd
                )))
            }
        }
    }

    fn version(&self) -> IpVersion {
        self.version
    }
}

/// Shell program and its "run this string" flag
fn shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("powershell", "-Command")
    } else if on_path("bash") {
        ("bash", "-c")
    } else {
        ("sh", "-c")
    }
}

fn on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| Path::new(&dir).join(program).is_file()))
        .unwrap_or(false)
}

/// Factory for creating command IP sources
pub struct CommandFactory;

impl IpSourceFactory for CommandFactory {
    fn create(&self, config: &IpSourceConfig, version: IpVersion) -> Result<Box<dyn IpSource>> {
        match config {
            IpSourceConfig::Command { cmd } if !cmd.trim().is_empty() => {
                Ok(Box::new(CommandIpSource::new(cmd.clone(), version)))
            }
            IpSourceConfig::Command { .. } => Err(Error::config("IP source command cannot be empty")),
            _ => Err(Error::config("Invalid config for command IP source")),
        }
    }
}

/// Register the command IP source with a registry
pub fn register(registry: &mut ProviderRegistry) {
    registry.register_ip_source("command", Box::new(CommandFactory));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use ddns_core::net::set_dns_server_override;

    #[tokio::test]
    async fn reads_the_address_from_stdout() {
        let source = CommandIpSource::new("echo 'inet 203.0.113.5/24 brd 203.0.113.255'", IpVersion::V4);
        assert_eq!(source.current().await.unwrap(), "203.0.113.5".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn reads_the_address_from_stderr() {
        let source = CommandIpSource::new("echo 2001:db8::42 >&2", IpVersion::V6);
        assert_eq!(source.current().await.unwrap(), "2001:db8::42".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn wrong_family_is_not_an_answer() {
        let source = CommandIpSource::new("echo 2001:db8::42", IpVersion::V4);
        assert!(matches!(source.current().await, Err(Error::IpSource(_))));
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let source = CommandIpSource::new("echo 203.0.113.5; exit 3", IpVersion::V4);
        let err = source.current().await.unwrap_err();
        assert!(err.to_string().contains("exited"));
    }

    #[tokio::test]
    async fn dns_server_override_reaches_the_command() {
        set_dns_server_override("9.9.9.9:53");
        // strip the port
        let source = CommandIpSource::new(format!("echo \"${{{DNS_SERVER_ENV}%:*}}\""), IpVersion::V4);
        assert_eq!(source.current().await.unwrap(), "9.9.9.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn picks_a_posix_shell() {
        let (program, flag) = shell();
        assert!(program == "bash" || program == "sh");
        assert_eq!(flag, "-c");
    }

    #[test]
    fn test_factory_creation() {
        let factory = CommandFactory;
        let config = IpSourceConfig::Command {
            cmd: "curl -s https://api.ipify.org".to_string(),
        };
        assert_eq!(factory.create(&config, IpVersion::V4).unwrap().version(), IpVersion::V4);

        let blank = IpSourceConfig::Command { cmd: "  ".to_string() };
        assert!(factory.create(&blank, IpVersion::V4).is_err());

        let wrong = IpSourceConfig::Http {
            url: "https://api.ipify.org".to_string(),
        };
        assert!(factory.create(&wrong, IpVersion::V4).is_err());
    }
}
