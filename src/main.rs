use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use h5calib::cli_error::CliError;
use h5calib::filter::pixels_from_bytes;
use h5calib::{synth, Descriptor, Filter, FilterConfig, FilterError, MemoryStorage};

/// Inspect, write and exercise calibration chunk descriptors.
#[derive(Parser)]
#[command(name = "h5calib", version)]
struct Cli {
    /// JSON filter configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    PedestalV1,
    AgipdV1,
    AgipdV2,
}

#[derive(Subcommand)]
enum Command {
    /// Decode the descriptor at the start of a chunk file and print it as JSON
    Inspect {
        input: PathBuf,
    },
    /// Write a chunk image holding a descriptor
    Encode {
        #[arg(long, value_enum)]
        algorithm: AlgorithmArg,
        #[arg(long)]
        file_tag: u32,
        #[arg(long)]
        image_index: u32,
        #[arg(long, default_value_t = 0)]
        cell_id: u32,
        #[arg(long, default_value_t = 1)]
        cells: u32,
        #[arg(long)]
        height: u32,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        raw: String,
        #[arg(long)]
        calib: String,
        /// Element size of the calibrated dataset; the descriptor is padded to it
        #[arg(long, default_value_t = 4)]
        item_size: usize,
        /// Total chunk length in bytes (defaults to the padded descriptor)
        #[arg(long)]
        chunk_len: Option<usize>,
        output: PathBuf,
    },
    /// Calibrate synthetic frames end to end and print them as JSON
    Demo {
        #[arg(long, value_enum, default_value = "agipd-v2")]
        algorithm: AlgorithmArg,
        #[arg(long, default_value_t = 3)]
        images: u32,
        #[arg(long, default_value_t = 4)]
        size: u32,
        #[arg(long, default_value_t = 2)]
        cells: u32,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => FilterConfig::from_json_file(path)
            .map_err(|e| CliError::io("read config", path, e))?,
        None => FilterConfig::default(),
    };

    match cli.command {
        Command::Inspect { input } => {
            let data = fs::read(&input).map_err(|e| CliError::io("read chunk", &input, e))?;
            let desc = h5calib::decode(&data)
                .map_err(|e| CliError::filter("decoding descriptor", e))?;
            print_json(&desc)?;
        }
        Command::Encode {
            algorithm,
            file_tag,
            image_index,
            cell_id,
            cells,
            height,
            width,
            raw,
            calib,
            item_size,
            chunk_len,
            output,
        } => {
            let desc = match algorithm {
                AlgorithmArg::PedestalV1 => {
                    Descriptor::pedestal_v1(file_tag, image_index, height, width, &raw, &calib)
                }
                AlgorithmArg::AgipdV1 => Descriptor::agipd_v1(
                    file_tag, cell_id, image_index, cells, height, width, &raw, &calib,
                ),
                AlgorithmArg::AgipdV2 => Descriptor::agipd_v2(
                    file_tag, cell_id, image_index, cells, height, width, &raw, &calib,
                ),
            }
            .map_err(|e| CliError::filter("building descriptor", e))?;
            let item = item_size.max(1);
            let len = chunk_len.unwrap_or_else(|| desc.encoded_length().div_ceil(item) * item);
            let chunk = desc.to_chunk(item, len).ok_or_else(|| {
                CliError::Usage(format!(
                    "descriptor of {} bytes does not fit in a {len} byte chunk",
                    desc.encoded_length()
                ))
            })?;
            fs::write(&output, &chunk).map_err(|e| CliError::io("write chunk", &output, e))?;
            eprintln!("Wrote {} byte chunk ({} descriptor bytes)", chunk.len(), desc.encoded_length());
        }
        Command::Demo {
            algorithm,
            images,
            size,
            cells,
        } => {
            let frames = demo(config, algorithm, images, size, cells.max(1))
                .map_err(|e| CliError::filter("calibrating demo frames", e))?;
            print_json(&serde_json::json!({ "frames": frames }))?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}

/// Build an in-memory file with raw and calibration datasets, then decode
/// one descriptor per image through the filter.
fn demo(
    config: FilterConfig,
    algorithm: AlgorithmArg,
    images: u32,
    size: u32,
    cells: u32,
) -> Result<Vec<Vec<f32>>, FilterError> {
    const TAG: u32 = 0x5EED_0001;
    let (n, h, w, c) = (images as u64, size as u64, size as u64, cells as u64);
    let pixels = (size * size) as usize;

    let mut storage = MemoryStorage::new();
    let file = storage.open_file("demo.h5");
    let attr = config.file_tag_attribute.clone();
    let setup = |storage: &mut MemoryStorage| -> Result<(), h5calib::StorageError> {
        storage.set_attr_u32(file, &attr, TAG)?;
        match algorithm {
            AlgorithmArg::PedestalV1 => {
                let pedestal: Vec<f32> = (0..pixels).map(|p| (p % 7) as f32).collect();
                let raw = (0..images as usize)
                    .flat_map(|i| pedestal.iter().map(move |v| v + 7.0 + i as f32))
                    .collect();
                storage.write_dataset(file, "/raw", &[n, h, w], raw)?;
                storage.write_dataset(file, "/pedestal", &[1, h, w], pedestal)
            }
            AlgorithmArg::AgipdV1 => {
                let raw = (0..images as usize)
                    .flat_map(|i| synth::ramp_image(size as usize, size as usize, i))
                    .collect();
                let calib = (0..cells as usize)
                    .flat_map(|cell| std::iter::repeat(cell as f32).take(pixels))
                    .collect();
                storage.write_dataset(file, "/raw", &[n, h, w], raw)?;
                storage.write_dataset(file, "/pedestal", &[c, h, w], calib)
            }
            AlgorithmArg::AgipdV2 => {
                let constants =
                    synth::agipd_calibration_constants(cells as usize, size as usize, size as usize);
                let mut raw = Vec::with_capacity(images as usize * pixels * 2);
                for i in 0..images as usize {
                    let image: Vec<f32> = (0..pixels).map(|p| (p * 40 + i) as f32).collect();
                    let encoded = synth::agipd_encode(&image, &constants, i % cells as usize)
                        .ok_or_else(|| h5calib::StorageError::Backend("bad cell".into()))?;
                    raw.extend(encoded);
                }
                storage.write_dataset(file, "/raw", &[n, h, w, 2], raw)?;
                storage.write_dataset(file, "/pedestal", &[c, h, w, 8], constants)
            }
        }
    };
    setup(&mut storage).map_err(|e| FilterError::Cache(e.into()))?;

    let mut filter = Filter::with_config(storage, config);
    let mut frames = Vec::with_capacity(images as usize);
    for i in 0..images {
        let cell = i % cells;
        let desc = match algorithm {
            AlgorithmArg::PedestalV1 => Descriptor::pedestal_v1(TAG, i, size, size, "/raw", "/pedestal"),
            AlgorithmArg::AgipdV1 => {
                Descriptor::agipd_v1(TAG, cell, i, cells, size, size, "/raw", "/pedestal")
            }
            AlgorithmArg::AgipdV2 => {
                Descriptor::agipd_v2(TAG, cell, i, cells, size, size, "/raw", "/pedestal")
            }
        }?;
        let chunk = desc.to_bytes();
        let out = filter.decode(&chunk)?;
        frames.push(pixels_from_bytes(&out));
    }
    Ok(frames)
}
