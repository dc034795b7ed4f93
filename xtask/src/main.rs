// Licensed under the Apache-2.0 license

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;

mod atf;
mod image;
mod lzma;
mod ota;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Xtask {
    /// Log every step, including offsets and sizes
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    xtask: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign, finish and verify firmware images
    Image {
        #[command(subcommand)]
        subcommand: ImageCommands,
    },
    /// Create, extract from and verify ATF archives
    Atf {
        #[command(subcommand)]
        subcommand: AtfCommands,
    },
    /// Create, unpack and verify OTA packages
    Ota {
        #[command(subcommand)]
        subcommand: OtaCommands,
    },
    /// Block LZMA compression
    Lzma {
        #[command(subcommand)]
        subcommand: LzmaCommands,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Checksum an image and optionally embed keys and sign it
    Sign {
        /// Linked image
        #[arg(short, long, value_name = "INPUT", required = true)]
        input: PathBuf,

        /// Signed image
        #[arg(short, long, value_name = "OUTPUT", required = true)]
        output: PathBuf,

        /// Private key; the image is only checksummed without it
        #[arg(short = 'k', long, value_name = "PRIVATE_KEY")]
        private_key: Option<PathBuf>,

        /// Public key to embed for verifying the next stage
        #[arg(short = 'c', long, value_name = "PUBLIC_KEY")]
        pubkey: Option<PathBuf>,

        /// Public key to embed for the boot ROM
        #[arg(short = 'b', long, value_name = "BROM_PUBLIC_KEY")]
        brom_pubkey: Option<PathBuf>,

        /// Command converting a PEM key, called as `<cmd...> <pem> <output>`
        #[arg(long, value_name = "CMD", num_args = 1.., allow_hyphen_values = true)]
        key_dump_cmd: Vec<String>,

        /// Path to the openssl binary
        #[arg(long, value_name = "OPENSSL", default_value = "openssl")]
        openssl: PathBuf,

        /// Bytes reserved for the signature region
        #[arg(long, value_parser = maybe_hex::<u16>, default_value_t = fw_image::tlv::DEFAULT_TLV_RESERVE)]
        tlv_reserve: u16,

        /// Fail instead of generating a header for images without one
        #[arg(long, default_value_t = false)]
        no_synthesize: bool,
    },
    /// Add boot parameters and the NAND id table to a boot loader
    Boot {
        #[arg(short, long, value_name = "INPUT", required = true)]
        input: PathBuf,

        #[arg(short, long, value_name = "OUTPUT", required = true)]
        output: PathBuf,

        /// Boot parameter TOML file
        #[arg(long, value_name = "PARAMS")]
        params: Option<PathBuf>,

        /// NAND id table
        #[arg(long, value_name = "NAND_ID")]
        nand_id: Option<PathBuf>,

        /// Boot loader uses the 32 byte legacy header
        #[arg(long, default_value_t = false)]
        legacy: bool,
    },
    /// Check an image's header and body checksums
    Verify {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum AtfCommands {
    /// Bundle files into an archive
    Create {
        #[arg(long, value_name = "OUTPUT", required = true)]
        output: PathBuf,

        /// Four character version tag
        #[arg(long, value_name = "TAG", default_value = "1.00")]
        version_tag: String,

        #[arg(value_name = "FILES", num_args = 1.., required = true)]
        files: Vec<PathBuf>,
    },
    /// Copy one file out of an archive
    Extract {
        #[arg(long, value_name = "ARCHIVE", required = true)]
        archive: PathBuf,

        #[arg(long, value_name = "NAME", required = true)]
        name: String,

        #[arg(long, value_name = "OUTPUT", required = true)]
        output: PathBuf,
    },
    /// Check an archive's checksums
    Verify {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum OtaCommands {
    /// Build a package from a firmware config and a directory of partition files
    Create {
        /// Firmware config TOML file
        #[arg(short, long, value_name = "CONFIG", required = true)]
        config: PathBuf,

        /// Directory holding the partition files
        #[arg(short, long, value_name = "DIRECTORY", required = true)]
        input_dir: PathBuf,

        /// Board name recorded in the version records
        #[arg(short, long, value_name = "BOARD", required = true)]
        board: String,

        #[arg(short, long, value_name = "OUTPUT", required = true)]
        output: PathBuf,
    },
    /// Write every file of a package into a directory
    Unpack {
        #[arg(short, long, value_name = "PACKAGE", required = true)]
        package: PathBuf,

        #[arg(short, long, value_name = "DIRECTORY", required = true)]
        dir: PathBuf,
    },
    /// Check a package's checksums
    Verify {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum LzmaCommands {
    Compress {
        #[arg(short, long, value_name = "INPUT", required = true)]
        input: PathBuf,

        #[arg(short, long, value_name = "OUTPUT", required = true)]
        output: PathBuf,

        /// Input bytes per block
        #[arg(long, value_parser = maybe_hex::<usize>, conflicts_with = "psram_kb")]
        block_size: Option<usize>,

        /// Pick the block size for a device with this much PSRAM (KiB)
        #[arg(long, value_parser = maybe_hex::<u32>)]
        psram_kb: Option<u32>,
    },
    Decompress {
        #[arg(short, long, value_name = "INPUT", required = true)]
        input: PathBuf,

        #[arg(short, long, value_name = "OUTPUT", required = true)]
        output: PathBuf,
    },
}

fn main() {
    let cli = Xtask::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::new().with_level(level).init();

    let result = match &cli.xtask {
        Commands::Image { subcommand } => match subcommand {
            ImageCommands::Sign {
                input,
                output,
                private_key,
                pubkey,
                brom_pubkey,
                key_dump_cmd,
                openssl,
                tlv_reserve,
                no_synthesize,
            } => image::sign(image::SignArgs {
                input,
                output,
                private_key: private_key.as_deref(),
                pubkey: pubkey.as_deref(),
                brom_pubkey: brom_pubkey.as_deref(),
                key_dump_cmd,
                openssl,
                tlv_reserve: *tlv_reserve,
                synthesize_header: !*no_synthesize,
            }),
            ImageCommands::Boot {
                input,
                output,
                params,
                nand_id,
                legacy,
            } => image::boot(input, output, params.as_deref(), nand_id.as_deref(), *legacy),
            ImageCommands::Verify { file } => image::verify(file),
        },
        Commands::Atf { subcommand } => match subcommand {
            AtfCommands::Create {
                output,
                version_tag,
                files,
            } => atf::create(files, version_tag, output),
            AtfCommands::Extract {
                archive,
                name,
                output,
            } => atf::extract(archive, name, output),
            AtfCommands::Verify { file } => atf::verify(file),
        },
        Commands::Ota { subcommand } => match subcommand {
            OtaCommands::Create {
                config,
                input_dir,
                board,
                output,
            } => ota::create(config, input_dir, board, output),
            OtaCommands::Unpack { package, dir } => ota::unpack(package, dir),
            OtaCommands::Verify { file } => ota::verify(file),
        },
        Commands::Lzma { subcommand } => match subcommand {
            LzmaCommands::Compress {
                input,
                output,
                block_size,
                psram_kb,
            } => lzma::compress(input, output, *block_size, *psram_kb),
            LzmaCommands::Decompress { input, output } => lzma::decompress(input, output),
        },
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    });
}
