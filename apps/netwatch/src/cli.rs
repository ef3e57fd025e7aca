use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::monitoring::Protocol;
use crate::store::ServiceConfig;

#[derive(Debug, Parser)]
#[command(name = "netwatch", version, about)]
pub struct Cli {
    /// Settings file (created with defaults when missing)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// One line typed at the interactive prompt
#[derive(Debug, Parser)]
#[command(name = "netwatch", no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Add a service to a server, creating the server if needed
    AddService(ServiceCommand),
    /// Replace the settings of an existing service
    EditService(ServiceCommand),
    /// Delete one service of a server
    DeleteService {
        target: String,
        protocol: Protocol,
    },
    /// Delete a server and all of its services
    DeleteServer { target: String },
    /// Show the configured servers
    ShowServers,
    /// Monitor every service of one server until Enter is pressed
    Monitor { target: String },
    /// Monitor every configured server until Enter is pressed
    MonitorAll,
    /// Run the loop-back echo server until Ctrl-C
    EchoServer {
        /// Address to listen on (defaults to the settings file)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Show the effective application settings
    Settings,
    /// Interactive prompt (default)
    Shell,
}

#[derive(Debug, Clone, Args)]
pub struct ServiceCommand {
    pub target: String,
    /// ICMP, HTTP, HTTPS, NTP, DNS, TCP, UDP or LOCAL-TCP
    pub protocol: Protocol,
    #[command(flatten)]
    pub service: ServiceArgs,
}

/// Service parameters; which ones apply depends on the protocol
#[derive(Debug, Clone, Default, Args)]
pub struct ServiceArgs {
    /// Seconds between checks
    #[arg(long)]
    pub interval: u64,

    /// HTTP and HTTPS
    #[arg(long)]
    pub url: Option<String>,

    /// TCP, UDP, LOCAL TCP (also NTP and DNS to override the well-known port)
    #[arg(long)]
    pub port: Option<u64>,

    /// Probe timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// DNS server to query
    #[arg(long)]
    pub dns_server: Option<String>,

    /// DNS name to look up
    #[arg(long)]
    pub query: Option<String>,

    /// DNS record types, comma separated or repeated
    #[arg(long = "record-type", value_delimiter = ',')]
    pub record_types: Vec<String>,

    /// ICMP time to live
    #[arg(long)]
    pub ttl: Option<u64>,

    /// ICMP echo sequence number
    #[arg(long)]
    pub sequence_number: Option<u64>,

    /// Enable the ICMP path probe up to this many hops
    #[arg(long)]
    pub max_hops: Option<u64>,

    #[arg(long)]
    pub pings_per_hop: Option<u64>,

    /// List unanswered hops of the path probe
    #[arg(long)]
    pub verbose_trace: bool,
}

impl ServiceArgs {
    /// Store representation; unset flags are left out
    pub fn into_service(self) -> ServiceConfig {
        let mut service = ServiceConfig::new(self.interval);

        let strings = [("url", self.url), ("dns_server", self.dns_server), ("query", self.query)];
        for (key, value) in strings {
            if let Some(value) = value {
                service = service.with_param(key, value);
            }
        }

        let numbers = [
            ("port", self.port),
            ("timeout", self.timeout),
            ("ttl", self.ttl),
            ("sequence_number", self.sequence_number),
            ("max_hops", self.max_hops),
            ("pings_per_hop", self.pings_per_hop),
        ];
        for (key, value) in numbers {
            if let Some(value) = value {
                service = service.with_param(key, value);
            }
        }

        if !self.record_types.is_empty() {
            let record_types: Vec<String> = self.record_types.into_iter().map(|rt| rt.trim().to_uppercase()).collect();
            service = service.with_param("record_types", record_types);
        }
        if self.verbose_trace {
            service = service.with_param("verbose", true);
        }
        service
    }
}
