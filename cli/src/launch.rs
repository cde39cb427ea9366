use std::{path::Path, process::ExitStatus};

use miette::{Context as _, IntoDiagnostic as _, Result};
use tokio::{process::Command, signal};

pub enum LaunchOutcome {
    Exited(ExitStatus),
    Interrupted,
}

/// Start `jupyter notebook` on the given path and block until it exits.
pub async fn jupyter_notebook(path: &Path, extra_args: &[String]) -> Result<LaunchOutcome> {
    let mut child = Command::new("jupyter")
        .arg("notebook")
        .arg(path)
        .args(extra_args)
        .spawn()
        .into_diagnostic()
        .wrap_err("failed to start `jupyter notebook` (is Jupyter installed?)")?;

    tokio::select! {
        status = child.wait() => Ok(LaunchOutcome::Exited(status.into_diagnostic()?)),
        res = signal::ctrl_c() => {
            res.into_diagnostic().wrap_err("failed to listen for interrupt")?;
            // Jupyter received the same SIGINT from the terminal; let it wind
            // down before the temporary directory is removed
            let _ = child.wait().await;
            Ok(LaunchOutcome::Interrupted)
        }
    }
}
