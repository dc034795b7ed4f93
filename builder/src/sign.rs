// Licensed under the Apache-2.0 license

//! The signing pipeline.
//!
//! ```text
//! Unsigned -> HeaderChecked -> [KeyEmbedded] -> ChecksummedForSigning -> [Signed] -> Finalized
//! ```
//!
//! Any failing step moves the pipeline to `Failed`, after which every step is
//! rejected and no image is produced.

use std::path::{Path, PathBuf};
use std::process::Command;

use fw_image::header::{IMAGE_ALIGN, IMAGE_FLAG_SIGNED};
use fw_image::tlv::{
    DEFAULT_TLV_RESERVE, TLV_TYPE_PUBKEY, TLV_TYPE_PUBKEY_BROM, TLV_TYPE_RSA2048_PSS,
};
use log::{debug, info};

use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::sign_sm::{Events, StateMachine, StateMachineContext, States};
use crate::tlv::TlvRegion;

/// Where a [`SigningPipeline`] stands.
pub type SignState = States;

/// The external signer and key dumper.
pub trait SigningTool {
    /// Sign `blob` with the private key, returning the raw signature.
    fn sign(&self, blob: &[u8]) -> Result<Vec<u8>>;

    /// Convert a PEM public key into the form the boot code verifies with.
    fn dump_pubkey(&self, pem: &Path) -> Result<Vec<u8>>;
}

/// Signs with the `openssl` command line tool and dumps keys with a
/// configurable command that is called as `<cmd...> <pem> <output>`.
#[derive(Clone, Debug)]
pub struct OpensslSigner {
    pub private_key: PathBuf,
    pub openssl: PathBuf,
    pub key_dump_cmd: Vec<String>,
}

impl OpensslSigner {
    pub fn new(private_key: impl Into<PathBuf>) -> Self {
        Self {
            private_key: private_key.into(),
            openssl: PathBuf::from("openssl"),
            key_dump_cmd: Vec::new(),
        }
    }

    pub fn with_key_dump_cmd(mut self, cmd: Vec<String>) -> Self {
        self.key_dump_cmd = cmd;
        self
    }

    /// RSA PKCS#1 v1.5 over SHA-256, the only scheme the boot ROM verifies.
    fn sign_command(&self, input: &Path) -> Command {
        let mut cmd = Command::new(&self.openssl);
        cmd.args(["dgst", "-sha256", "-sign"])
            .arg(&self.private_key)
            .arg(input);
        cmd
    }
}

fn run(cmd: &mut Command) -> Result<Vec<u8>> {
    debug!("running {:?}", cmd);
    let output = cmd
        .output()
        .map_err(|e| Error::Signer(format!("cannot run {:?}: {}", cmd.get_program(), e)))?;
    if !output.status.success() {
        return Err(Error::Signer(format!(
            "{:?} failed with {}: {}",
            cmd.get_program(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

impl SigningTool for OpensslSigner {
    fn sign(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let input = tempfile::NamedTempFile::new()?;
        std::fs::write(input.path(), blob)?;
        run(&mut self.sign_command(input.path()))
    }

    fn dump_pubkey(&self, pem: &Path) -> Result<Vec<u8>> {
        let (program, args) = self
            .key_dump_cmd
            .split_first()
            .ok_or_else(|| Error::Signer("no key dump command configured".into()))?;
        let output = tempfile::NamedTempFile::new()?;
        run(Command::new(program).args(args).arg(pem).arg(output.path()))?;
        Ok(std::fs::read(output.path())?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignOptions {
    /// Public key embedded for verifying the next stage.
    pub pubkey: Option<PathBuf>,
    /// Extra public key embedded for the boot ROM.
    pub brom_pubkey: Option<PathBuf>,
    /// Bytes reserved for the public TLV region.
    pub tlv_reserve: u16,
    /// Generate a header when the input has none.
    pub synthesize_header: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            pubkey: None,
            brom_pubkey: None,
            tlv_reserve: DEFAULT_TLV_RESERVE,
            synthesize_header: true,
        }
    }
}

/// Owns the image while the state machine drives it.
struct PipelineContext<'a> {
    image: FirmwareImage,
    options: SignOptions,
    signer: Option<&'a dyn SigningTool>,
    /// Bytes handed out by the last completed step.
    output: Option<Vec<u8>>,
    /// Error of the last failed action.
    failure: Option<Error>,
}

impl<'a> PipelineContext<'a> {
    fn signer(&self) -> Result<&'a dyn SigningTool> {
        self.signer
            .ok_or_else(|| Error::InvalidInput("no signer configured".into()))
    }

    fn record(&mut self, result: Result<()>) -> std::result::Result<(), ()> {
        result.map_err(|e| self.failure = Some(e))
    }

    fn check_header(&mut self) -> Result<()> {
        let header = self.image.check_header(self.options.synthesize_header)?;
        info!(
            "image {:?}: header {:#x}, body {:#x}",
            String::from_utf8_lossy(&header.name),
            header.header_size.get(),
            header.img_size.get()
        );
        Ok(())
    }

    fn embed_keys(&mut self) -> Result<()> {
        let signer = self.signer()?;
        let keys = [
            (TLV_TYPE_PUBKEY_BROM, self.options.brom_pubkey.clone()),
            (TLV_TYPE_PUBKEY, self.options.pubkey.clone()),
        ];
        for (kind, pem) in keys {
            let Some(pem) = pem else { continue };
            let key = signer.dump_pubkey(&pem)?;
            self.image.append_tlv(TlvRegion::Protected, kind, &key)?;
            info!("embedded {} ({} bytes)", pem.display(), key.len());
        }
        Ok(())
    }

    fn checksum_for_signing(&mut self) -> Result<()> {
        let reserve = self.options.tlv_reserve;
        let signed = self.signer.is_some();
        self.image.update_header(|h| {
            h.tlv_size.set(reserve);
            if signed {
                h.flags.set(h.flags.get() | IMAGE_FLAG_SIGNED);
            }
        })?;
        let header = self.image.recompute_checksums()?;
        self.output = Some(self.image.as_bytes()[..header.public_tlv_offset()].to_vec());
        Ok(())
    }

    fn sign(&mut self, blob: &[u8]) -> Result<()> {
        let signature = self.signer()?.sign(blob)?;
        if signature.is_empty() {
            return Err(Error::Signer("empty signature".into()));
        }
        self.image
            .append_tlv(TlvRegion::Public, TLV_TYPE_RSA2048_PSS, &signature)?;
        self.image
            .update_header(|h| h.flags.set(h.flags.get() | IMAGE_FLAG_SIGNED))?;
        info!("signed, {} byte signature", signature.len());
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.image.recompute_checksums()?;
        self.image.pad_to(IMAGE_ALIGN);
        self.output = Some(self.image.as_bytes().to_vec());
        Ok(())
    }
}

impl StateMachineContext for PipelineContext<'_> {
    // Guards
    fn has_signer(&self) -> std::result::Result<bool, ()> {
        Ok(self.signer.is_some())
    }

    // Actions
    fn on_check_header(&mut self) -> std::result::Result<(), ()> {
        let result = self.check_header();
        self.record(result)
    }

    fn on_embed_keys(&mut self) -> std::result::Result<(), ()> {
        let result = self.embed_keys();
        self.record(result)
    }

    fn on_checksum_for_signing(&mut self) -> std::result::Result<(), ()> {
        let result = self.checksum_for_signing();
        self.record(result)
    }

    fn on_sign(&mut self, blob: Vec<u8>) -> std::result::Result<(), ()> {
        let result = self.sign(&blob);
        self.record(result)
    }

    fn on_finalize(&mut self) -> std::result::Result<(), ()> {
        let result = self.finalize();
        self.record(result)
    }
}

pub struct SigningPipeline<'a> {
    sm: StateMachine<PipelineContext<'a>>,
}

impl<'a> SigningPipeline<'a> {
    pub fn new(raw: Vec<u8>, options: SignOptions, signer: Option<&'a dyn SigningTool>) -> Self {
        Self {
            sm: StateMachine::new(PipelineContext {
                image: FirmwareImage::new(raw),
                options,
                signer,
                output: None,
                failure: None,
            }),
        }
    }

    pub fn state(&self) -> SignState {
        *self.sm.state()
    }

    pub fn image(&self) -> &FirmwareImage {
        &self.sm.context().image
    }

    /// Feed `event` to the state machine. A rejected event leaves the state
    /// alone; a failed action aborts the pipeline.
    fn fire(&mut self, step: &'static str, event: Events) -> Result<Vec<u8>> {
        let state = self.state();
        if self.sm.process_event(event).is_ok() {
            debug!("sign: {:?} -> {:?}", state, self.state());
            return Ok(self.sm.context_mut().output.take().unwrap_or_default());
        }
        match self.sm.context_mut().failure.take() {
            Some(e) => {
                let _ = self.sm.process_event(Events::Abort);
                Err(e)
            }
            None => Err(Error::InvalidTransition { step, state }),
        }
    }

    pub fn check_header(&mut self) -> Result<()> {
        self.fire("check the header", Events::CheckHeader)?;
        Ok(())
    }

    /// Embed the configured public keys as protected TLV records, the boot
    /// ROM key first. Needs a signer.
    pub fn embed_keys(&mut self) -> Result<()> {
        self.fire("embed keys", Events::EmbedKeys)?;
        Ok(())
    }

    /// Reserve the public TLV region, mark the image signed when a signer is
    /// configured, recompute checksums and return the bytes to sign.
    pub fn checksum_for_signing(&mut self) -> Result<Vec<u8>> {
        self.fire("checksum for signing", Events::ChecksumForSigning)
    }

    /// Sign `blob` and append the signature as a public TLV record.
    pub fn sign(&mut self, blob: &[u8]) -> Result<()> {
        self.fire("sign", Events::Sign(blob.to_vec()))?;
        Ok(())
    }

    /// Recompute checksums, pad and hand out the finished image.
    pub fn finalize(&mut self) -> Result<Vec<u8>> {
        self.fire("finalize", Events::Finalize)
    }

    /// Run every step that applies to the configured options.
    pub fn run(mut self) -> Result<Vec<u8>> {
        self.check_header()?;
        let context = self.sm.context();
        let has_keys = context.options.pubkey.is_some() || context.options.brom_pubkey.is_some();
        let has_signer = context.signer.is_some();
        if has_signer && has_keys {
            self.embed_keys()?;
        }
        let blob = self.checksum_for_signing()?;
        if has_signer {
            self.sign(&blob)?;
        }
        self.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use crate::image::{tests::test_image, verify};
    use crate::tlv::TlvRecord;
    use fw_image::checksum::crc32;
    use std::cell::RefCell;

    /// Signs with a CRC and records what it was asked to sign.
    #[derive(Default)]
    struct FakeSigner {
        signed: RefCell<Vec<Vec<u8>>>,
        sig_len: usize,
    }

    impl FakeSigner {
        fn new(sig_len: usize) -> Self {
            Self {
                sig_len,
                ..Default::default()
            }
        }
    }

    impl SigningTool for FakeSigner {
        fn sign(&self, blob: &[u8]) -> Result<Vec<u8>> {
            self.signed.borrow_mut().push(blob.to_vec());
            let crc = crc32(blob).to_le_bytes();
            Ok(crc.iter().copied().cycle().take(self.sig_len).collect())
        }

        fn dump_pubkey(&self, pem: &Path) -> Result<Vec<u8>> {
            Ok(pem.to_string_lossy().as_bytes().to_vec())
        }
    }

    fn raw_image() -> Vec<u8> {
        test_image(&[0x5a; 0x3f0]).into_bytes()
    }

    #[test]
    fn test_unsigned_run() {
        let out = SigningPipeline::new(raw_image(), SignOptions::default(), None)
            .run()
            .unwrap();
        assert_eq!(out.len() % 512, 0);
        let header = verify(&out).unwrap();
        assert!(!header.is_signed());
        assert_eq!(header.tlv_size.get(), DEFAULT_TLV_RESERVE);
        assert_eq!(header.ptlv_size.get(), 0);
        assert_eq!(header.img_size.get(), 0x3f0);
    }

    #[test]
    fn test_signed_run_with_keys() {
        let signer = FakeSigner::new(256);
        let options = SignOptions {
            pubkey: Some(PathBuf::from("verify_key.pem")),
            brom_pubkey: Some(PathBuf::from("brom_key.pem")),
            ..Default::default()
        };
        let out = SigningPipeline::new(raw_image(), options, Some(&signer))
            .run()
            .unwrap();

        let header = verify(&out).unwrap();
        assert!(header.is_signed());
        let image = FirmwareImage::new(out.clone());
        assert_eq!(
            image.tlv_records(TlvRegion::Protected).unwrap(),
            vec![
                TlvRecord {
                    kind: TLV_TYPE_PUBKEY_BROM,
                    value: b"brom_key.pem".to_vec()
                },
                TlvRecord {
                    kind: TLV_TYPE_PUBKEY,
                    value: b"verify_key.pem".to_vec()
                },
            ]
        );

        // The signature covers exactly the header, body and protected region
        // of the final image.
        let signed = signer.signed.borrow();
        assert_eq!(signed.len(), 1);
        assert_eq!(&signed[0][..], &out[..header.public_tlv_offset()]);
        let public = image.tlv_records(TlvRegion::Public).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].kind, TLV_TYPE_RSA2048_PSS);
        assert_eq!(public[0].value.len(), 256);
        assert_eq!(&public[0].value[..4], &crc32(&signed[0]).to_le_bytes());
    }

    #[test]
    fn test_signed_without_keys_skips_key_embedding() {
        let signer = FakeSigner::new(64);
        let mut pipeline = SigningPipeline::new(raw_image(), SignOptions::default(), Some(&signer));
        pipeline.check_header().unwrap();
        let blob = pipeline.checksum_for_signing().unwrap();
        assert_eq!(pipeline.state(), SignState::ChecksummedForSigning);
        pipeline.sign(&blob).unwrap();
        assert_eq!(pipeline.state(), SignState::Signed);
        let out = pipeline.finalize().unwrap();
        assert_eq!(pipeline.state(), SignState::Finalized);
        assert_eq!(verify(&out).unwrap().ptlv_size.get(), 0);
    }

    #[test]
    fn test_out_of_order_steps() {
        let signer = FakeSigner::new(64);
        let mut pipeline = SigningPipeline::new(raw_image(), SignOptions::default(), Some(&signer));
        assert!(matches!(
            pipeline.sign(b"blob"),
            Err(Error::InvalidTransition {
                state: SignState::Unsigned,
                ..
            })
        ));
        assert!(pipeline.finalize().is_err());
        pipeline.check_header().unwrap();
        assert!(pipeline.check_header().is_err());
        // Rejected calls do not change the state.
        assert_eq!(pipeline.state(), SignState::HeaderChecked);
    }

    #[test]
    fn test_oversized_signature_fails_without_output() {
        let signer = FakeSigner::new(0x100);
        let options = SignOptions {
            tlv_reserve: 0x40,
            ..Default::default()
        };
        let mut pipeline = SigningPipeline::new(raw_image(), options, Some(&signer));
        pipeline.check_header().unwrap();
        let blob = pipeline.checksum_for_signing().unwrap();
        let err = pipeline.sign(&blob).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::Overflow("public TLV region")));
        assert_eq!(pipeline.state(), SignState::Failed);
        assert!(pipeline.finalize().is_err());
    }

    #[test]
    fn test_bad_magic_without_synthesis() {
        let options = SignOptions {
            synthesize_header: false,
            ..Default::default()
        };
        let err = SigningPipeline::new(vec![0u8; 0x400], options, None)
            .run()
            .unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::BadMagic("image header")));
    }

    #[test]
    fn test_embed_keys_needs_signer() {
        let options = SignOptions {
            pubkey: Some(PathBuf::from("verify_key.pem")),
            ..Default::default()
        };
        let mut pipeline = SigningPipeline::new(raw_image(), options, None);
        pipeline.check_header().unwrap();
        assert!(matches!(
            pipeline.embed_keys(),
            Err(Error::InvalidTransition {
                state: SignState::HeaderChecked,
                ..
            })
        ));
        assert_eq!(pipeline.state(), SignState::HeaderChecked);
        assert!(pipeline.checksum_for_signing().is_ok());
    }

    #[test]
    fn test_openssl_sign_command() {
        let signer = OpensslSigner::new("keys/rsa2048.pem");
        let cmd = signer.sign_command(Path::new("blob.bin"));
        assert_eq!(cmd.get_program(), "openssl");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(
            args,
            ["dgst", "-sha256", "-sign", "keys/rsa2048.pem", "blob.bin"]
        );
    }

    #[test]
    fn test_openssl_signature_is_pkcs1() {
        let openssl_present = Command::new("openssl")
            .arg("version")
            .output()
            .is_ok_and(|out| out.status.success());
        if !openssl_present {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.pem");
        let public = dir.path().join("pub.pem");
        assert!(Command::new("openssl")
            .args(["genrsa", "-out"])
            .arg(&key)
            .arg("2048")
            .output()
            .unwrap()
            .status
            .success());
        assert!(Command::new("openssl")
            .args(["rsa", "-pubout", "-in"])
            .arg(&key)
            .arg("-out")
            .arg(&public)
            .output()
            .unwrap()
            .status
            .success());

        let blob = raw_image();
        let signature = OpensslSigner::new(&key).sign(&blob).unwrap();
        assert_eq!(signature.len(), 256);

        let blob_path = dir.path().join("blob.bin");
        let sig_path = dir.path().join("sig.bin");
        std::fs::write(&blob_path, &blob).unwrap();
        std::fs::write(&sig_path, &signature).unwrap();
        // dgst -verify defaults to PKCS#1 v1.5 padding.
        let verified = Command::new("openssl")
            .args(["dgst", "-sha256", "-verify"])
            .arg(&public)
            .arg("-signature")
            .arg(&sig_path)
            .arg(&blob_path)
            .output()
            .unwrap();
        assert!(verified.status.success());
    }

    #[test]
    fn test_synthesized_header_run() {
        let mut raw = vec![0u8; 0x600];
        raw[0x200..0x204].copy_from_slice(&0x2000_4000u32.to_le_bytes());
        raw[0x204..0x208].copy_from_slice(&0x1000_0101u32.to_le_bytes());
        let out = SigningPipeline::new(raw, SignOptions::default(), None)
            .run()
            .unwrap();
        let header = verify(&out).unwrap();
        assert_eq!(header.run_addr.get(), 0x1000_0101);
        assert_eq!(header.img_size.get(), 0x400);
    }
}
