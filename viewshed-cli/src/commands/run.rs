use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use viewshed::{CoverageStats, RawViewshedRequest, Viewshed};

use super::EngineOptions;

pub async fn run(
    options: &EngineOptions,
    lng: f64,
    lat: f64,
    mount_height: f64,
    max_distance: Option<f64>,
    output: Option<PathBuf>,
    stats: bool,
) -> Result<()> {
    let service = options.build_service()?;

    let mut request = RawViewshedRequest::new(lng, lat, mount_height);
    request.max_distance = max_distance;

    let viewshed = service
        .compute(&request)
        .await
        .context("Failed to compute viewshed")?;

    let stdout = std::io::stdout();
    write_viewshed(&viewshed, output.as_deref(), stats, &mut stdout.lock())
}

/// Print coverage, or write the GeoJSON to `output` (or `out` when absent).
fn write_viewshed<W: Write>(
    viewshed: &Viewshed,
    output: Option<&Path>,
    stats: bool,
    out: &mut W,
) -> Result<()> {
    if stats {
        match &viewshed.stats {
            Some(stats) => write_stats(stats, out)?,
            None => writeln!(out, "Coverage unavailable: engine output carries no unit")?,
        }
        return Ok(());
    }

    let geojson = serde_json::to_string_pretty(&viewshed.to_feature_collection())?;
    match output {
        Some(path) => {
            std::fs::write(path, geojson)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            writeln!(out, "Output written to: {}", path.display())?;
        }
        None => writeln!(out, "{}", geojson)?,
    }

    Ok(())
}

fn write_stats<W: Write>(stats: &CoverageStats, out: &mut W) -> Result<()> {
    writeln!(out, "Visible regions: {}", stats.visible_regions)?;
    writeln!(out, "Visible area: {:.1} sq {}", stats.visible_area, stats.units)?;
    writeln!(
        out,
        "Analysis area: {:.1} sq {} (radius {} {})",
        stats.analysis_area, stats.units, stats.radius, stats.units
    )?;
    writeln!(out, "Coverage: {:.1}%", stats.coverage_percent)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;
    use viewshed::{
        EngineFault, EngineFuture, EngineJob, ViewshedProvider, ViewshedServiceBuilder,
    };

    const OUTPUT: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[-96.21095,41.1982]},"properties":{"type":"observer","elevation":1096.0,"units":"feet"}}]}"#;
    const UNITLESS: &str = r#"{"type":"FeatureCollection","features":[]}"#;

    struct FixedProvider(&'static str);

    impl ViewshedProvider for FixedProvider {
        fn compute_viewshed<'a>(&'a self, _job: &'a EngineJob) -> EngineFuture<'a> {
            let output = self.0.to_string();
            Box::pin(async move { Ok::<_, EngineFault>(output) })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    async fn compute(dir: &TempDir, output: &'static str) -> Viewshed {
        let dsm = dir.path().join("dsm.tif");
        std::fs::write(&dsm, b"dsm").unwrap();
        ViewshedServiceBuilder::new(&dsm)
            .provider(FixedProvider(output))
            .build()
            .compute(&RawViewshedRequest::new(-96.21095, 41.1982, 30.0))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_geojson_to_stdout() {
        let dir = TempDir::new().unwrap();
        let viewshed = compute(&dir, OUTPUT).await;

        let mut out = Vec::new();
        write_viewshed(&viewshed, None, false, &mut out).unwrap();

        let json: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["features"][0]["properties"]["type"], "observer");
        assert_eq!(json["stats"]["units"], "feet");
    }

    #[tokio::test]
    async fn test_geojson_to_file() {
        let dir = TempDir::new().unwrap();
        let viewshed = compute(&dir, OUTPUT).await;
        let path = dir.path().join("viewshed.geojson");

        let mut out = Vec::new();
        write_viewshed(&viewshed, Some(&path), false, &mut out).unwrap();

        let message = String::from_utf8(out).unwrap();
        assert!(message.starts_with("Output written to: "));
        let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
    }

    #[tokio::test]
    async fn test_stats_summary() {
        let dir = TempDir::new().unwrap();
        let viewshed = compute(&dir, OUTPUT).await;
        let path = dir.path().join("unused.geojson");

        let mut out = Vec::new();
        write_viewshed(&viewshed, Some(&path), true, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Visible regions: 0"));
        assert!(text.contains("radius 500 feet"));
        assert!(text.contains("Coverage: 0.0%"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stats_without_units() {
        let dir = TempDir::new().unwrap();
        let viewshed = compute(&dir, UNITLESS).await;

        let mut out = Vec::new();
        write_viewshed(&viewshed, None, true, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Coverage unavailable"));
    }
}
