//! `a3s-airgap images` command.
//!
//! Lists the image references the archive command would pull, without
//! contacting any registry.

use std::path::PathBuf;

use a3s_airgap_runtime::ImageReferenceSet;
use clap::Args;

#[derive(Args)]
pub struct ImagesArgs {
    /// Manifest file or directory to scan; repeatable, "-" reads stdin
    #[arg(short, long, required = true)]
    pub file: Vec<PathBuf>,

    /// Write the list to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print a JSON array instead of one reference per line
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ImagesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let images = super::scan_manifests(&args.file)?;
    let rendered = render(&images, args.json)?;

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &rendered)
                .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
            tracing::info!(path = %path.display(), count = images.len(), "Wrote image list");
        }
        None => print!("{rendered}"),
    }

    Ok(())
}

fn render(images: &ImageReferenceSet, json: bool) -> Result<String, serde_json::Error> {
    if json {
        let list: Vec<&str> = images.iter().collect();
        return Ok(serde_json::to_string_pretty(&list)? + "\n");
    }

    Ok(images.iter().map(|image| format!("{image}\n")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images() -> ImageReferenceSet {
        ["nginx:1.25", "busybox:1.36"].into_iter().collect()
    }

    #[test]
    fn test_render_lines() {
        assert_eq!(render(&images(), false).unwrap(), "busybox:1.36\nnginx:1.25\n");
        assert_eq!(render(&ImageReferenceSet::new(), false).unwrap(), "");
    }

    #[test]
    fn test_render_json() {
        let rendered = render(&images(), true).unwrap();
        let parsed: Vec<String> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, vec!["busybox:1.36", "nginx:1.25"]);
        assert_eq!(render(&ImageReferenceSet::new(), true).unwrap(), "[]\n");
    }
}
