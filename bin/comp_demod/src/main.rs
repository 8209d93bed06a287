use comp::comp_processor::Processor;
use comp::double_buffer::Snapshot;
use comp::phy_stats::PhyStats;
use comp_core::comp_config::Config;
use comp_sim::channel_model::ChannelModel;
use comp_sim::uplink_simulator::{SimulatorSettings, UplinkSimulator};
use std::io::{BufWriter, Write};
use std::time::Duration;
use num::complex::Complex32;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ChannelArg {
    Identity,
    Rayleigh,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppArguments {
    /// Path to the JSON configuration record. If not provided uses the default 4 antenna, 2 user setup.
    #[arg(short, long)]
    config: Option<String>,
    /// Number of frames to simulate
    #[arg(short = 'n', long, default_value_t = 100)]
    frames: u64,
    /// Signal to noise ratio in dB. If not provided the uplink is noiseless.
    #[arg(short, long)]
    snr_db: Option<f32>,
    /// Seed for the channel, noise and transmitted data
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Propagation model between the users and the antennas
    #[arg(long, value_enum, default_value_t = ChannelArg::Rayleigh)]
    channel: ChannelArg,
    /// Subcarriers where every user is given the same channel
    #[arg(long, value_delimiter = ',')]
    singular_subcarriers: Vec<usize>,
    /// Frame indices that the simulated front-end never delivers
    #[arg(long, value_delimiter = ',')]
    skip_frames: Vec<u64>,
    /// Deliver frames at the configured radio frame rate instead of as fast as possible
    #[arg(long)]
    paced: bool,
    /// Output filepath for demodulated symbols as i8. If not provided uses stdout by default.
    #[arg(short, long)]
    output_filepath: Option<String>,
    /// Output filepath for equalized symbols as interleaved little endian f32 pairs
    #[arg(long)]
    equalized_filepath: Option<String>,
    /// Report the pipeline counters and error rates as JSON on stderr
    #[arg(long)]
    json: bool,
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), String> {
    let args = AppArguments::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    // Parse arguments
    let config = match &args.config {
        None => Config::default(),
        Some(filepath) => Config::from_path(filepath).map_err(|err| err.to_string())?,
    };
    let settings = SimulatorSettings {
        nb_frames: args.frames,
        first_frame_index: 0,
        snr_db: args.snr_db,
        seed: args.seed,
        channel: match args.channel {
            ChannelArg::Identity => ChannelModel::Identity,
            ChannelArg::Rayleigh => ChannelModel::Rayleigh,
        },
        singular_subcarriers: args.singular_subcarriers.clone(),
        skipped_frames: args.skip_frames.clone(),
        paced: args.paced,
    };
    let mut output_file: Box<dyn Write> = match &args.output_filepath {
        None => Box::new(BufWriter::new(std::io::stdout())),
        Some(filepath) => match std::fs::File::create(filepath) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => return Err(format!("Failed to open file {}: {}", filepath, err)),
        },
    };
    let mut equalized_file: Option<BufWriter<std::fs::File>> = match &args.equalized_filepath {
        None => None,
        Some(filepath) => match std::fs::File::create(filepath) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(err) => return Err(format!("Failed to open file {}: {}", filepath, err)),
        },
    };

    // Setup simulated front-end and processor
    let simulator = UplinkSimulator::new(&config, settings).map_err(|err| err.to_string())?;
    let transmit_log = simulator.transmit_log();
    let mut phy_stats = PhyStats::new(config.ue_num, config.modulation.bits_per_symbol());
    let mut processor = Processor::create(config).map_err(|err| err.to_string())?;
    processor.attach_source(simulator).map_err(|err| err.to_string())?;
    processor.start().map_err(|err| err.to_string())?;

    // Only the latest sealed generation is ever visible, so slow polling skips generations
    let mut last_generation = 0;
    let mut nb_written_frames = 0;
    let mut write_latest = |processor: &Processor| -> Result<(), String> {
        let demodulated = processor.fetch_demodulated().map_err(|err| err.to_string())?;
        if demodulated.generation() == last_generation {
            return Ok(());
        }
        if demodulated.generation() > last_generation + 1 {
            warn!(from = last_generation + 1, to = demodulated.generation() - 1, "skipped output generations");
        }
        last_generation = demodulated.generation();
        nb_written_frames += demodulated.frame_indices().len();

        match transmit_log.concat(demodulated.frame_indices()) {
            Some(transmitted) => phy_stats.update(&demodulated, &transmitted),
            None => warn!(generation = last_generation, "missing transmitted labels for generation"),
        }
        let bytes: Vec<u8> = demodulated.iter().map(|&x| x as i8 as u8).collect();
        output_file.write_all(&bytes).map_err(|err| format!("Error while writing to output: {}", err))?;

        if let Some(file) = equalized_file.as_mut() {
            let equalized = processor.fetch_equalized().map_err(|err| err.to_string())?;
            match matching_equalized(&demodulated, equalized) {
                Some(equalized) => write_complex(file, &equalized).map_err(|err| format!("Error while writing equalized output: {}", err))?,
                None => warn!(generation = last_generation, "equalized output covers other frames, skipped writing it"),
            }
        }
        Ok(())
    };

    while !processor.wait_for_source(Duration::from_millis(10)) {
        write_latest(&processor)?;
    }
    processor.stop().map_err(|err| err.to_string())?;
    write_latest(&processor)?;
    drop(write_latest);
    info!(nb_written_frames, "finished writing outputs");

    output_file.flush().map_err(|err| format!("Error while flushing output: {}", err))?;
    if let Some(file) = equalized_file.as_mut() {
        file.flush().map_err(|err| format!("Error while flushing equalized output: {}", err))?;
    }

    let stats = processor.stats();
    if args.json {
        let report = serde_json::json!({
            "pipeline": stats,
            "phy": phy_stats,
        });
        eprintln!("{}", report);
    } else {
        eprintln!("{:#?}", stats);
        eprint!("{}", phy_stats);
    }
    processor.destroy();
    Ok(())
}

/// Both output files must describe the same frames.
/// The equalizer seals independently of the demodulator so its latest generation can already be ahead.
fn matching_equalized(demodulated: &Snapshot<i64>, equalized: Snapshot<Complex32>) -> Option<Snapshot<Complex32>> {
    (equalized.frame_indices() == demodulated.frame_indices()).then_some(equalized)
}

fn write_complex(file: &mut impl Write, values: &[Complex32]) -> std::io::Result<()> {
    for x in values {
        file.write_all(&x.re.to_le_bytes())?;
        file.write_all(&x.im.to_le_bytes())?;
    }
    Ok(())
}
