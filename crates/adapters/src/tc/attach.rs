use std::path::{Path, PathBuf};

use domain::attach::entity::TcAttachPoint;
use domain::common::error::DomainError;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Name tc gives the pinned jump map of our programs.
const JUMP_MAP_NAME: &str = "cali_jump";

// tc is vulnerable to lost updates when invoked concurrently, and the
// pin sweep below must not interleave with another attach. One lock,
// process-wide, held for both.
static TC_LOCK: Mutex<()> = Mutex::const_new(());

/// Attach a compiled BPF object to the attach point's interface and
/// hook, serialised against every other tc invocation in the process.
///
/// After the attach (failed or not), every `cali_jump` pin under
/// `bpf_fs_root` is re-pinned under a random suffix and the original
/// pin removed. tc pins object-local maps under a name derived from
/// the program hash, which collides when the same program is loaded
/// onto two interfaces; removing the pin outright is not an option
/// because deletion of an in-use map clears its entries.
pub async fn attach_program(
    obj_file: &Path,
    attach_point: &TcAttachPoint,
    bpf_fs_root: &Path,
) -> Result<(), DomainError> {
    let _guard = TC_LOCK.lock().await;
    let result = run_tc_filter_add(obj_file, attach_point).await;
    sweep_jump_pins(bpf_fs_root).await;
    result
}

async fn run_tc_filter_add(
    obj_file: &Path,
    attach_point: &TcAttachPoint,
) -> Result<(), DomainError> {
    let output = Command::new("tc")
        .args(["filter", "add", "dev"])
        .arg(&attach_point.iface)
        .arg(attach_point.hook.as_str())
        .args(["bpf", "da", "obj"])
        .arg(obj_file)
        .arg("sec")
        .arg(&attach_point.section)
        .output()
        .await
        .map_err(|e| DomainError::Attach {
            iface: attach_point.iface.clone(),
            reason: format!("failed to run tc: {e}"),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if is_iface_missing(&combined) {
        // Avoid a big, spammy log when the interface simply isn't
        // there; the next state update re-marks it dirty.
        warn!(
            iface = %attach_point.iface,
            "failed to attach BPF program; interface not found, will retry if it shows up"
        );
        return Ok(());
    }

    error!(
        out = %combined,
        iface = %attach_point.iface,
        hook = attach_point.hook.as_str(),
        section = %attach_point.section,
        obj = %obj_file.display(),
        "failed to attach BPF program"
    );
    Err(DomainError::Attach {
        iface: attach_point.iface.clone(),
        reason: format!("tc exited with {}: {combined}", output.status),
    })
}

pub(crate) fn is_iface_missing(tc_output: &str) -> bool {
    tc_output.contains("Cannot find device")
}

/// Re-pin every `cali_jump` map under `root`.
///
/// # Panics
///
/// A walk or re-pin failure is fatal: losing track of a live pin is
/// not recoverable.
async fn sweep_jump_pins(root: &Path) {
    for path in find_jump_pins(root) {
        if let Err(e) = repin_map(&path).await {
            error!(error = %e, path = %path.display(), "failed to re-pin map");
            panic!("failed to re-pin map {}: {e}", path.display());
        }
    }
    debug!("finished moving map pins");
}

fn find_jump_pins(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                walk(&entry.path(), found)?;
            } else if entry.file_name() == JUMP_MAP_NAME {
                found.push(entry.path());
            }
        }
        Ok(())
    }

    let mut found = Vec::new();
    if let Err(e) = walk(root, &mut found) {
        panic!("failed to walk BPF filesystem at {}: {e}", root.display());
    }
    found
}

/// First field of `bpftool map show pinned` output, i.e. the map id in
/// `<id>: <type>  name <name> ...`.
pub(crate) fn parse_map_id(show_output: &str) -> Option<&str> {
    let id = show_output.split(':').next()?.trim();
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then_some(id)
}

async fn repin_map(path: &Path) -> anyhow::Result<()> {
    debug!(path = %path.display(), "queueing re-pin of map");

    let show = Command::new("bpftool")
        .args(["map", "show", "pinned"])
        .arg(path)
        .output()
        .await?;
    if !show.status.success() {
        anyhow::bail!(
            "bpftool map show failed: {}",
            String::from_utf8_lossy(&show.stderr)
        );
    }
    let stdout = String::from_utf8_lossy(&show.stdout);
    let id = parse_map_id(&stdout)
        .ok_or_else(|| anyhow::anyhow!("no map id in bpftool output: {stdout:?}"))?;
    info!(dump = %stdout, "map show before re-pin");

    // TODO: derive the new pin path from the interface and hook so the
    // map can be looked up again later.
    let new_path = format!("{}{}", path.display(), rand::random::<u32>());
    let pin = Command::new("bpftool")
        .args(["map", "pin", "id", id])
        .arg(&new_path)
        .output()
        .await?;
    if !pin.status.success() {
        anyhow::bail!(
            "bpftool map pin failed: {}",
            String::from_utf8_lossy(&pin.stderr)
        );
    }

    std::fs::remove_file(path)?;
    Ok(())
}
