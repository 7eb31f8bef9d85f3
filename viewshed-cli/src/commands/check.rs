use anyhow::Result;
use viewshed::DsmLocator;

use super::EngineOptions;

pub async fn run(options: &EngineOptions) -> Result<()> {
    let dsm = DsmLocator::new(options.dsm_path()?);
    let engine = options.engine();

    println!("DSM: {}", dsm.path().display());
    match dsm.locate().await {
        Ok(reference) => {
            println!("Status: available");
            println!("File size: {}", format_size(reference.size_bytes));
        }
        Err(e) => println!("Status: unavailable ({})", e),
    }
    println!();

    println!("Engine: {}", engine.command_line());
    println!(
        "Invocation: {} <dsm> <lng> <lat> <mount_height> <max_distance>",
        engine.command_line()
    );
    match options.timeout() {
        Some(timeout) => println!("Timeout: {}s", timeout.as_secs()),
        None => println!("Timeout: disabled"),
    }
    println!("Default max distance: {}", options.default_max_distance);

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(25 * 1024 * 1024), "25.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
