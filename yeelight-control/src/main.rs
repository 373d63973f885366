use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};

use yeelight_control_lib::session::{Endpoint, Session};
use yeelight_control_lib::util::constants::{DEFAULT_COMMAND_PORT, MIN_DURATION_MS};
use yeelight_control_lib::util::discovery::{Discovery, DiscoveryOptions};
use yeelight_control_lib::util::params::{Effect, PowerState};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "yeelight_control",
    about = "Controls LAN smart lights",
    version = "0.1.0"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Subcommand for operations that require device communication
    #[clap(name = "device-call")]
    DeviceCall {
        /// Sets the IP address or host name of the light
        #[clap(long)]
        ip: String,

        /// Sets the command port of the light
        #[clap(long, default_value_t = DEFAULT_COMMAND_PORT)]
        port: u16,

        #[clap(subcommand)]
        action: DeviceAction,
    },
    /// Searches the local network for lights
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Time to wait for further replies after each search request, in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,

        /// Number of search requests to send
        #[clap(short = 'p', long = "probes", default_value_t = 1)]
        probes: u32,

        /// Network interface to search on, e.g. eth0
        #[clap(short = 'i', long = "interface")]
        interface: Option<String>,
    },
}

/// How a state change is applied.
#[derive(clap::Args, Clone, Copy)]
pub struct Transition {
    /// Duration of the transition in milliseconds
    #[clap(long, default_value_t = MIN_DURATION_MS, value_parser = clap::value_parser!(u64))]
    duration: u64,

    /// Effect of the transition
    #[clap(long, value_enum, default_value_t = Effect::Sudden)]
    effect: Effect,
}

impl Transition {
    fn duration(&self) -> Duration {
        Duration::from_millis(self.duration)
    }
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    /// Switches the light on or off.
    #[clap(name = "set-power")]
    SetPower {
        #[clap(value_enum)]
        state: PowerState,

        #[clap(flatten)]
        transition: Transition,
    },
    /// Sets the brightness in percent.
    #[clap(name = "set-brightness")]
    SetBrightness {
        /// Brightness (0-100)
        #[clap(allow_negative_numbers = true)]
        brightness: i32,

        #[clap(flatten)]
        transition: Transition,
    },
    /// Sets the color.
    #[clap(name = "set-color")]
    SetColor {
        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red", value_parser = clap::value_parser!(u8))]
        red: u8,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green", value_parser = clap::value_parser!(u8))]
        green: u8,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue", value_parser = clap::value_parser!(u8))]
        blue: u8,

        #[clap(flatten)]
        transition: Transition,
    },
    /// Reads properties, e.g. `power bright rgb`.
    #[clap(name = "get-props")]
    GetProps {
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// Switches to music mode, cycles through a few colors and switches back.
    #[clap(name = "music-test")]
    MusicTest {
        /// Local address the light can reach
        #[clap(long)]
        local_ip: IpAddr,

        /// Local port to listen on, 0 picks a free one
        #[clap(long, default_value_t = 0)]
        local_port: u16,

        /// Time each color is shown, in milliseconds
        #[clap(long, default_value = "200", value_parser = parse_duration)]
        step: Duration,
    },
}

fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let millis = s
        .parse::<u64>()
        .map_err(|_| "could not parse duration in milliseconds")?;
    Ok(Duration::from_millis(millis))
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover {
            output,
            timeout,
            probes,
            interface,
        } => {
            let options = DiscoveryOptions {
                receive_timeout: Duration::from_millis(timeout),
                probe_count: probes,
                interface,
            };
            let devices = Discovery::discover_devices(&options).await?;
            match output {
                OutputFormat::Plaintext => {
                    Discovery::pretty_print_devices(&devices);
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string(&devices)?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml = serde_yaml::to_string(&devices)?;
                    println!("{}", yaml);
                }
            }
        }
        Commands::DeviceCall { ip, port, action } => {
            let mut session = Session::resolve(&ip, port).await?;
            session.connect().await?;

            match action {
                DeviceAction::SetPower { state, transition } => {
                    let written = session
                        .set_power(state, transition.duration(), transition.effect)
                        .await?;
                    report_written(written)?;
                    println!("Power set to {}", state);
                }
                DeviceAction::SetBrightness {
                    brightness,
                    transition,
                } => {
                    let written = session
                        .set_brightness(brightness, transition.duration(), transition.effect)
                        .await?;
                    report_written(written)?;
                    println!("Brightness set to {}", brightness);
                }
                DeviceAction::SetColor {
                    red,
                    green,
                    blue,
                    transition,
                } => {
                    let written = session
                        .set_color(red, green, blue, transition.duration(), transition.effect)
                        .await?;
                    report_written(written)?;
                    println!("Color set to ({}, {}, {})", red, green, blue);
                }
                DeviceAction::GetProps { names } => {
                    let values = session.get_properties(names.as_slice()).await?;
                    for (name, value) in names.iter().zip(values) {
                        println!("{}: {}", name, value);
                    }
                }
                DeviceAction::MusicTest {
                    local_ip,
                    local_port,
                    step,
                } => {
                    run_music_test(&mut session, local_ip, local_port, step).await?;
                }
            }

            if session.is_connected() {
                session.close_connection()?;
            }
        }
    }

    Ok(())
}

async fn run_music_test(
    session: &mut Session,
    local_ip: IpAddr,
    local_port: u16,
    step: Duration,
) -> Result<()> {
    let endpoint: Endpoint = session.endpoint();
    session
        .set_streaming_mode(local_ip, local_port, true)
        .await?;
    println!("{} is in music mode", endpoint);

    let colors = [(255, 0, 0), (0, 255, 0), (0, 0, 255), (255, 255, 255)];
    for (red, green, blue) in colors {
        let written = session
            .set_color(red, green, blue, Duration::from_millis(MIN_DURATION_MS), Effect::Sudden)
            .await?;
        report_written(written)?;
        tokio::time::sleep(step).await;
    }

    session
        .set_streaming_mode(local_ip, local_port, false)
        .await?;
    println!("{} is back in normal mode", endpoint);
    Ok(())
}

fn report_written(written: bool) -> Result<()> {
    if written {
        Ok(())
    } else {
        Err(anyhow!("The command was only partially sent"))
    }
}
