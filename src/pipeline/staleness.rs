use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::trace;

/// True when `target` is missing or any source is strictly newer than it.
///
/// Sources are resolved against `source_root`; ones that cannot be stat'ed
/// are ignored.
pub fn rebuild_required<I, S>(sources: I, source_root: &Path, target: &Path) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let Some(target_time) = modified(target) else {
        trace!(target = %target.display(), "Target missing, rebuild required");
        return true;
    };

    sources.into_iter().any(|source| {
        let path = source_root.join(source.as_ref());
        match modified(&path) {
            Some(time) if time > target_time => {
                trace!(source = %path.display(), "Source newer than target");
                true
            }
            _ => false,
        }
    })
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
