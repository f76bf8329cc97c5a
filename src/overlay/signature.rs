//! OpenPGP verification of signed catalogs through an external `gpg`.

use duct::cmd;
use std::io::Write;
use std::path::PathBuf;

/// Checks signed catalog content. Errors carry the verifier's explanation.
pub trait SignatureVerifier {
    /// Verify a clear-signed document and return the signed text alone.
    fn verify_clearsigned(&self, signed: &[u8]) -> Result<Vec<u8>, String>;

    /// Verify `data` against a detached `signature`.
    fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<(), String>;
}

pub struct GpgVerifier {
    command: String,
    homedir: Option<PathBuf>,
}

impl GpgVerifier {
    pub fn new(command: impl Into<String>, homedir: Option<PathBuf>) -> Self {
        Self {
            command: command.into(),
            homedir,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--batch".to_string(), "--no-tty".to_string()];
        if let Some(home) = &self.homedir {
            args.push("--homedir".to_string());
            args.push(home.to_string_lossy().into_owned());
        }
        args
    }
}

fn explain(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    match (output.status.code(), stderr.is_empty()) {
        (Some(code), true) => format!("gpg exited with status {code}"),
        (Some(code), false) => format!("gpg exited with status {code}: {stderr}"),
        (None, _) => "gpg was terminated by a signal".to_string(),
    }
}

impl SignatureVerifier for GpgVerifier {
    fn verify_clearsigned(&self, signed: &[u8]) -> Result<Vec<u8>, String> {
        let mut args = self.base_args();
        args.push("--decrypt".to_string());
        let output = cmd(&self.command, &args)
            .stdin_bytes(signed.to_vec())
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|e| format!("failed to run {}: {e}", self.command))?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(explain(&output))
        }
    }

    fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<(), String> {
        let write_temp = |bytes: &[u8]| -> Result<tempfile::NamedTempFile, String> {
            let mut file = tempfile::NamedTempFile::new().map_err(|e| e.to_string())?;
            file.write_all(bytes).map_err(|e| e.to_string())?;
            Ok(file)
        };
        let data_file = write_temp(data)?;
        let sig_file = write_temp(signature)?;

        let mut args = self.base_args();
        args.push("--verify".to_string());
        args.push(sig_file.path().to_string_lossy().into_owned());
        args.push(data_file.path().to_string_lossy().into_owned());

        let output = cmd(&self.command, &args)
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|e| format!("failed to run {}: {e}", self.command))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(explain(&output))
        }
    }
}
