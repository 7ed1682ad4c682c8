use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hidapi::{HidApi, HidDevice};
use tracing::debug;

use stagelink_lib::api::{Panel, STAGE_USB_PRODUCT_ID, STAGE_USB_VENDOR_ID};
use stagelink_lib::config::{Rgb, StageConfig};
use stagelink_lib::error::StageError;
use stagelink_lib::sensor_test::SensorTestMode;
use stagelink_lib::{StageSession, StageTransport};

/// Diagnostics and configuration for a connected stage.
#[derive(Parser)]
#[command(name = "stagelink", about = "Talk to a connected stage over HID")]
struct Cli {
    /// Print decoded records as JSON where supported
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected stages
    List,
    /// Query device information
    Info,
    /// Read and display the configuration
    Config,
    /// Run a sensor test and print per-panel readings
    Test {
        #[arg(long, value_enum, default_value_t = TestMode::Calibrated)]
        mode: TestMode,
    },
    /// Force sensor recalibration
    Recalibrate,
    /// Reset the stage to factory defaults
    FactoryReset,
    /// Set the platform light strip to a solid color
    Lights { r: u8, g: u8, b: u8 },
    /// Enable or disable panel test mode
    PanelTest {
        #[arg(long)]
        off: bool,
    },
    /// Stream panel press state
    Watch,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TestMode {
    Uncalibrated,
    Calibrated,
    Noise,
    Tare,
}

impl From<TestMode> for SensorTestMode {
    fn from(mode: TestMode) -> Self {
        match mode {
            TestMode::Uncalibrated => SensorTestMode::UncalibratedValues,
            TestMode::Calibrated => SensorTestMode::CalibratedValues,
            TestMode::Noise => SensorTestMode::Noise,
            TestMode::Tare => SensorTestMode::Tare,
        }
    }
}

struct HidTransport {
    device: Arc<HidDevice>,
}

impl StageTransport for HidTransport {
    fn write_report(&mut self, report_id: u8, data: &[u8]) -> Result<(), StageError> {
        let mut report = Vec::with_capacity(1 + data.len());
        report.push(report_id);
        report.extend_from_slice(data);
        self.device
            .write(&report)
            .map_err(|err| StageError::Transport(err.to_string()))?;
        Ok(())
    }
}

/// Pump inbound reports into the session until either side goes away.
fn spawn_reader(device: Arc<HidDevice>, session: StageSession) {
    thread::spawn(move || {
        let mut buf = [0u8; 64];
        loop {
            match device.read_timeout(&mut buf, 250) {
                Ok(0) => continue,
                Ok(n) => {
                    // hidapi returns the report id as the first byte.
                    if session.push_report_blocking(buf[0], &buf[1..n]).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%err, "read failed, stopping reader");
                    break;
                }
            }
        }
    });
}

fn list_stages(api: &HidApi) {
    let mut found = false;
    for device in api.device_list() {
        if device.vendor_id() == STAGE_USB_VENDOR_ID && device.product_id() == STAGE_USB_PRODUCT_ID
        {
            found = true;
            println!(
                "{} ({})",
                device.product_string().unwrap_or("stage"),
                device.path().to_string_lossy()
            );
        }
    }
    if !found {
        println!("No stages found.");
    }
}

fn print_config(config: &StageConfig) {
    println!(
        "master version {}, config version {:#04x}",
        config.master_version, config.config_version
    );
    println!(
        "sensors: {}",
        if config.is_fsr() { "FSR" } else { "load cell" }
    );
    println!(
        "debounce: nodelay {} ms, delay {} ms, panel {} us",
        config.debounce_nodelay_milliseconds.get(),
        config.debounce_delay_milliseconds.get(),
        config.panel_debounce_microseconds.get()
    );
    let color = config.platform_strip_color;
    println!(
        "platform strip color #{:02X}{:02X}{:02X}",
        color.r, color.g, color.b
    );
    let enabled = config.enabled_sensors();
    for (panel, sensors) in Panel::ALL.iter().zip(enabled.iter()) {
        let settings = &config.panel_settings[*panel as usize];
        println!(
            "{panel:>10}: enabled u/r/d/l {}/{}/{}/{}  load cell {}..{}  fsr {:?}..{:?}",
            u8::from(sensors.up),
            u8::from(sensors.right),
            u8::from(sensors.down),
            u8::from(sensors.left),
            settings.load_cell_low_threshold,
            settings.load_cell_high_threshold,
            settings.fsr_low_threshold,
            settings.fsr_high_threshold,
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let api = HidApi::new().context("initializing hidapi")?;
    if let Commands::List = cli.command {
        list_stages(&api);
        return Ok(());
    }

    let device = api
        .open(STAGE_USB_VENDOR_ID, STAGE_USB_PRODUCT_ID)
        .context("opening stage (is one plugged in?)")?;
    let device = Arc::new(device);
    let session = StageSession::new(HidTransport {
        device: device.clone(),
    });
    spawn_reader(device, session.clone());

    match cli.command {
        Commands::List => unreachable!("handled above"),
        Commands::Info => {
            let info = session.update_device_info().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!(
                    "player {} serial {} firmware {}",
                    info.player, info.serial, info.firmware_version
                );
            }
        }
        Commands::Config => {
            let config = session.update_config().await?;
            print_config(&config);
        }
        Commands::Test { mode } => {
            session.update_device_info().await?;
            session.update_config().await?;
            let test = session.update_test_data(mode.into()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&test)?);
            } else {
                println!("mode: {}", test.mode);
                for (panel, data) in Panel::ALL.iter().zip(test.panels.iter()) {
                    if !data.have_data_from_panel {
                        println!("{panel:>10}: no data");
                        continue;
                    }
                    println!(
                        "{panel:>10}: levels {:?}  dip {}  bad sensors {:?}  bad jumpers {:?}",
                        data.sensor_level, data.dip_switch_value, data.bad_sensor_input,
                        data.bad_jumper,
                    );
                }
            }
        }
        Commands::Recalibrate => {
            session.force_recalibration().await?;
            println!("recalibration requested");
        }
        Commands::FactoryReset => {
            session.factory_reset().await?;
            println!("factory reset requested");
        }
        Commands::Lights { r, g, b } => {
            session.set_light_strip(Rgb::new(r, g, b)).await?;
            println!("light strip set to #{r:02X}{g:02X}{b:02X}");
        }
        Commands::PanelTest { off } => {
            session.set_panel_test_mode(!off).await?;
            println!("panel test mode {}", if off { "off" } else { "on" });
        }
        Commands::Watch => {
            println!("watching panel state, ctrl-c to stop");
            let mut inputs = session.inputs();
            loop {
                inputs.changed().await.map_err(|_| StageError::SessionClosed)?;
                let pressed = inputs.borrow_and_update().to_array();
                let mut line = String::new();
                for (i, panel) in Panel::ALL.iter().enumerate() {
                    if pressed[i] {
                        line.push_str(&format!("{panel} "));
                    }
                }
                println!("[{}]", line.trim_end());
            }
        }
    }

    Ok(())
}
