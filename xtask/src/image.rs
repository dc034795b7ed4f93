// Licensed under the Apache-2.0 license

use anyhow::{bail, Context, Result};
use fw_builder::boot::{boot_post_build, legacy_boot_post_build, BootParamsConfig};
use fw_builder::output::write_atomic;
use fw_builder::sign::OpensslSigner;
use fw_builder::{image, read_file, SignOptions, SigningPipeline, SigningTool};
use std::path::Path;

pub(crate) struct SignArgs<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub private_key: Option<&'a Path>,
    pub pubkey: Option<&'a Path>,
    pub brom_pubkey: Option<&'a Path>,
    pub key_dump_cmd: &'a [String],
    pub openssl: &'a Path,
    pub tlv_reserve: u16,
    pub synthesize_header: bool,
}

pub(crate) fn sign(args: SignArgs) -> Result<()> {
    let raw = read_file(args.input)?;
    if args.private_key.is_none() && (args.pubkey.is_some() || args.brom_pubkey.is_some()) {
        bail!("public keys can only be embedded when signing with a private key");
    }

    let signer = args.private_key.map(|key| {
        let mut signer = OpensslSigner::new(key).with_key_dump_cmd(args.key_dump_cmd.to_vec());
        signer.openssl = args.openssl.to_path_buf();
        signer
    });
    let options = SignOptions {
        pubkey: args.pubkey.map(Path::to_path_buf),
        brom_pubkey: args.brom_pubkey.map(Path::to_path_buf),
        tlv_reserve: args.tlv_reserve,
        synthesize_header: args.synthesize_header,
    };
    let pipeline = SigningPipeline::new(
        raw,
        options,
        signer.as_ref().map(|s| s as &dyn SigningTool),
    );
    let signed = pipeline
        .run()
        .with_context(|| format!("signing {}", args.input.display()))?;

    write_atomic(args.output, &signed)
        .with_context(|| format!("writing {}", args.output.display()))?;
    Ok(())
}

pub(crate) fn boot(
    input: &Path,
    output: &Path,
    params: Option<&Path>,
    nand_id: Option<&Path>,
    legacy: bool,
) -> Result<()> {
    let image = read_file(input)?;
    let params = params
        .map(BootParamsConfig::load)
        .transpose()?
        .map(|config| config.to_parameters());
    let nand_id = nand_id.map(read_file).transpose()?;

    let finished = if legacy {
        legacy_boot_post_build(image, params.as_ref(), nand_id.as_deref())?
    } else {
        boot_post_build(image, params.as_ref(), nand_id.as_deref())?
    };
    write_atomic(output, &finished)?;
    Ok(())
}

pub(crate) fn verify(file: &Path) -> Result<()> {
    let data = read_file(file)?;
    let header = image::verify(&data).with_context(|| format!("verifying {}", file.display()))?;
    println!(
        "{}: {:?} image {:#x} bytes, tlv {:#x}/{:#x}, {}",
        file.display(),
        String::from_utf8_lossy(&header.name).trim_end_matches('\0'),
        header.img_size.get(),
        header.ptlv_size.get(),
        header.tlv_size.get(),
        if header.is_signed() { "signed" } else { "unsigned" }
    );
    Ok(())
}
