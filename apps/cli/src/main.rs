use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use twsane_core::backend::OptionKind;
use twsane_core::protocol::constants::*;
use twsane_core::protocol::{
    ImageInfo, ImageMemXfer, Item, Palette8, PendingXfers, RasterImage, SetupMemXfer, Status,
};
use twsane_core::session::display_name;
use twsane_core::{
    Capability, DataSource, DeviceSession, Fix32, Identity, Payload, ReturnCode,
    SimulatedBackend, SourceConfig, TracingObserver, UserInterface,
};

mod pnm;

#[derive(Parser, Debug)]
#[command(author, version, about = "TWAIN SANE data source driver", long_about = None)]
struct Args {
    /// Data source configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List scanner devices
    Devices,
    /// Show the options of a device
    Options {
        #[arg(short, long, default_value_t = 0)]
        device: usize,
    },
    /// Scan one page and write it as PBM/PGM/PPM
    Scan {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        device: usize,
        #[arg(short, long, value_enum)]
        mode: Option<Mode>,
        /// Resolution in dpi
        #[arg(short, long)]
        resolution: Option<u16>,
        /// Use memory transfer instead of native
        #[arg(long)]
        memory: bool,
        /// Host buffer size for memory transfer, in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        buffer: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Lineart,
    Gray,
    Color,
}

impl Mode {
    fn pixel_type(self) -> u16 {
        match self {
            Mode::Lineart => TWPT_BW,
            Mode::Gray => TWPT_GRAY,
            Mode::Color => TWPT_RGB,
        }
    }
}

/// Plays the part of a TWAIN host talking to the data source.
struct Host {
    source: DataSource<SimulatedBackend, TracingObserver>,
    identity: Identity,
}

impl Host {
    fn new(config: SourceConfig) -> Self {
        Self {
            source: DataSource::new(SimulatedBackend::new(), config),
            identity: Identity::application("twsane-cli"),
        }
    }

    fn call(&mut self, dg: u32, dat: u16, msg: u16, payload: &mut Payload) -> Result<ReturnCode> {
        let rc = self.source.entry(&self.identity, dg, dat, msg, payload);
        if rc != ReturnCode::Failure {
            return Ok(rc);
        }
        let mut status = Payload::Status(Status::default());
        self.source
            .entry(&self.identity, DG_CONTROL, DAT_STATUS, MSG_GET, &mut status);
        match status {
            Payload::Status(s) => bail!(
                "{} failed with condition code {}",
                payload.name(),
                s.condition_code
            ),
            _ => bail!("{} failed", payload.name()),
        }
    }

    fn open(&mut self, device: usize) -> Result<()> {
        let mut id = Payload::Identity(Identity::default());
        self.call(DG_CONTROL, DAT_IDENTITY, MSG_OPENDS, &mut id)
            .context("Cannot open the data source")?;
        if device != 0 {
            self.source.select_device(device)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut id = Payload::Identity(Identity::default());
        self.call(DG_CONTROL, DAT_IDENTITY, MSG_CLOSEDS, &mut id)?;
        Ok(())
    }

    fn set_cap(&mut self, id: u16, item: Item) -> Result<()> {
        let mut cap = Payload::Capability(Capability::with_value(id, item));
        if self.call(DG_CONTROL, DAT_CAPABILITY, MSG_SET, &mut cap)? == ReturnCode::CheckStatus {
            info!(cap = format_args!("0x{id:04X}"), "Value adjusted by the device");
        }
        Ok(())
    }

    fn image_info(&mut self) -> Result<ImageInfo> {
        let mut info = Payload::ImageInfo(ImageInfo::default());
        self.call(DG_IMAGE, DAT_IMAGEINFO, MSG_GET, &mut info)?;
        match info {
            Payload::ImageInfo(info) => Ok(info),
            _ => bail!("unexpected image info payload"),
        }
    }

    fn native_transfer(&mut self) -> Result<RasterImage> {
        let mut native = Payload::ImageNativeXfer(None);
        self.call(DG_IMAGE, DAT_IMAGENATIVEXFER, MSG_GET, &mut native)?;
        match native {
            Payload::ImageNativeXfer(Some(raster)) => Ok(raster),
            _ => bail!("native transfer returned no image"),
        }
    }

    fn memory_transfer(&mut self, buffer: usize) -> Result<RasterImage> {
        let info = self.image_info()?;
        let mut setup = Payload::SetupMemXfer(SetupMemXfer::default());
        self.call(DG_CONTROL, DAT_SETUPMEMXFER, MSG_GET, &mut setup)?;
        let Payload::SetupMemXfer(setup) = setup else {
            bail!("unexpected setup payload");
        };
        let size = buffer.max(setup.min_buf_size as usize);

        let mut data = Vec::with_capacity(setup.preferred as usize);
        let mut bytes_per_row = 0;
        loop {
            let mut p = Payload::ImageMemXfer(ImageMemXfer::with_capacity(size));
            let rc = self.call(DG_IMAGE, DAT_IMAGEMEMXFER, MSG_GET, &mut p)?;
            let Payload::ImageMemXfer(xfer) = p else {
                bail!("unexpected memory transfer payload");
            };
            bytes_per_row = xfer.bytes_per_row;
            data.extend_from_slice(&xfer.memory[..xfer.bytes_written as usize]);
            if rc == ReturnCode::XferDone {
                break;
            }
        }
        info!(bytes = data.len(), "Memory transfer complete");
        Ok(RasterImage {
            width: info.image_width as u32,
            height: info.image_length as u32,
            bytes_per_row,
            bits_per_pixel: info.bits_per_pixel as u16,
            pixel_type: info.pixel_type as u16,
            x_resolution: info.x_resolution,
            y_resolution: info.y_resolution,
            data,
        })
    }

    fn palette(&mut self) -> Result<Box<Palette8>> {
        let mut p = Payload::Palette8(Box::default());
        self.call(DG_IMAGE, DAT_PALETTE8, MSG_GET, &mut p)?;
        match p {
            Payload::Palette8(palette) => Ok(palette),
            _ => bail!("unexpected palette payload"),
        }
    }
}

fn list_devices() -> Result<()> {
    let mut devices = DeviceSession::new(SimulatedBackend::new());
    for (index, device) in devices.enumerate()?.iter().enumerate() {
        println!("{index}: {} ({}, {})", display_name(device), device.name, device.kind);
    }
    Ok(())
}

fn list_options(config: SourceConfig, device: usize) -> Result<()> {
    let mut host = Host::new(config);
    host.open(device)?;
    let devices = host.source.devices();
    for (index, desc) in devices.options().iter() {
        if matches!(desc.kind, OptionKind::Group) {
            println!("{}:", desc.title);
            continue;
        }
        let value = if desc.caps.active && desc.has_value() {
            devices
                .get(index)
                .map(|v| format!("{v:?}"))
                .unwrap_or_else(|e| format!("<{e}>"))
        } else {
            "<inactive>".to_string()
        };
        println!("  {:<16} {:<24} {value}", desc.name, desc.title);
    }
    println!("Scan area: {}", host.source.region_label()?);
    host.close()
}

fn scan(
    config: SourceConfig,
    device: usize,
    mode: Option<Mode>,
    resolution: Option<u16>,
    memory: bool,
    buffer: usize,
    output: &PathBuf,
) -> Result<()> {
    let mut host = Host::new(config);
    host.open(device)?;

    if let Some(mode) = mode {
        host.set_cap(ICAP_PIXELTYPE, Item::UInt16(mode.pixel_type()))?;
    }
    if let Some(dpi) = resolution {
        let dpi = Item::Fix32(Fix32::from_int(dpi.into()));
        host.set_cap(ICAP_XRESOLUTION, dpi.clone())?;
        host.set_cap(ICAP_YRESOLUTION, dpi)?;
    }
    if memory {
        host.set_cap(ICAP_XFERMECH, Item::UInt16(TWSX_MEMORY))?;
    }

    let mut ui = Payload::UserInterface(UserInterface::default());
    host.call(DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDS, &mut ui)
        .context("Scan failed")?;

    let raster = if memory {
        host.memory_transfer(buffer)?
    } else {
        host.native_transfer()?
    };
    let palette = if raster.pixel_type == TWPT_PALETTE {
        Some(host.palette()?)
    } else {
        None
    };

    let mut pending = Payload::PendingXfers(PendingXfers::default());
    host.call(DG_CONTROL, DAT_PENDINGXFERS, MSG_ENDXFER, &mut pending)?;
    let mut ui = Payload::UserInterface(UserInterface::default());
    host.call(DG_CONTROL, DAT_USERINTERFACE, MSG_DISABLEDS, &mut ui)?;
    host.close()?;

    pnm::write(output, &raster, palette.as_deref())
        .with_context(|| format!("Cannot write {}", output.display()))?;
    info!(
        path = %output.display(),
        width = raster.width,
        height = raster.height,
        "Image written"
    );
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => SourceConfig::load_from_file(path)
            .with_context(|| format!("Cannot load {}", path.display()))?,
        None => SourceConfig::default(),
    };

    match args.command {
        Command::Devices => list_devices(),
        Command::Options { device } => list_options(config, device),
        Command::Scan {
            output,
            device,
            mode,
            resolution,
            memory,
            buffer,
        } => scan(config, device, mode, resolution, memory, buffer, &output),
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
