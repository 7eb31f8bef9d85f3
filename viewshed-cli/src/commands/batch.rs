use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use viewshed::{RawViewshedRequest, ViewshedService};

use super::EngineOptions;

/// CSV column names for observer sites.
#[derive(Debug, Clone)]
pub struct Columns {
    pub lng: String,
    pub lat: String,
    pub height: String,
    /// Optional; rows fall back to the default radius when absent or empty.
    pub distance: String,
}

/// Columns appended to every output row.
const RESULT_COLUMNS: [&str; 6] = [
    "visible_regions",
    "visible_area",
    "analysis_area",
    "coverage_percent",
    "units",
    "error",
];

struct ColumnIndices {
    lng: usize,
    lat: usize,
    height: usize,
    distance: Option<usize>,
}

pub async fn run(
    options: &EngineOptions,
    input: PathBuf,
    output: Option<PathBuf>,
    columns: &Columns,
) -> Result<()> {
    let service = options.build_service()?;

    let output_path = output.unwrap_or_else(|| default_output_path(&input));
    let summary = process_csv(&service, &input, &output_path, columns).await?;

    println!(
        "Processed {} sites ({} failed)",
        summary.total, summary.failed
    );
    println!("Output written to: {}", output_path.display());
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct BatchSummary {
    total: usize,
    failed: usize,
}

async fn process_csv(
    service: &ViewshedService,
    input: &Path,
    output_path: &Path,
    columns: &Columns,
) -> Result<BatchSummary> {
    let file = File::open(input).context("Failed to open input file")?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    // Find column indices
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h == name);
    let indices = ColumnIndices {
        lng: position(&columns.lng)
            .with_context(|| format!("Column '{}' not found in CSV", columns.lng))?,
        lat: position(&columns.lat)
            .with_context(|| format!("Column '{}' not found in CSV", columns.lat))?,
        height: position(&columns.height)
            .with_context(|| format!("Column '{}' not found in CSV", columns.height))?,
        distance: position(&columns.distance),
    };

    // Collect records for progress bar
    let records: Vec<_> = reader.records().collect::<Result<_, _>>()?;
    let total = records.len() as u64;

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let output_file = File::create(output_path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(output_file));

    let mut new_headers: Vec<&str> = headers.iter().collect();
    new_headers.extend(RESULT_COLUMNS);
    writer.write_record(&new_headers)?;

    let mut summary = BatchSummary::default();

    // One engine run per site; a failed site is recorded, not fatal.
    for record in records {
        summary.total += 1;

        let result = match parse_site(&record, &indices) {
            Ok(request) => service
                .compute(&request)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(format!("{:#}", e)),
        };

        let cells = match result {
            Ok(viewshed) => match viewshed.stats {
                Some(stats) => [
                    stats.visible_regions.to_string(),
                    format!("{:.2}", stats.visible_area),
                    format!("{:.2}", stats.analysis_area),
                    format!("{:.2}", stats.coverage_percent),
                    stats.units.to_string(),
                    String::new(),
                ],
                None => [
                    viewshed.response.visible_areas().count().to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                ],
            },
            Err(error) => {
                summary.failed += 1;
                pb.println(format!("Row {}: {}", summary.total, error));
                [
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    error,
                ]
            }
        };

        let mut new_record: Vec<&str> = record.iter().collect();
        new_record.extend(cells.iter().map(String::as_str));
        writer.write_record(&new_record)?;

        pb.inc(1);
    }

    pb.finish_with_message("done");
    writer.flush()?;

    Ok(summary)
}

fn parse_site(record: &csv::StringRecord, indices: &ColumnIndices) -> Result<RawViewshedRequest> {
    let field = |idx: usize, name: &str| -> Result<Option<f64>> {
        match record.get(idx).map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value
                .parse::<f64>()
                .map(Some)
                .with_context(|| format!("Invalid {}: {}", name, value)),
        }
    };

    Ok(RawViewshedRequest {
        lng: field(indices.lng, "longitude")?,
        lat: field(indices.lat, "latitude")?,
        mount_height: field(indices.height, "mount height")?,
        max_distance: match indices.distance {
            Some(idx) => field(idx, "max distance")?,
            None => None,
        },
    })
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sites".to_string());
    input.with_file_name(format!("{}_viewshed.csv", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use viewshed::{EngineFault, EngineFuture, EngineJob, ViewshedProvider, ViewshedServiceBuilder};

    const OUTPUT: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[-96.21095,41.1982]},"properties":{"type":"observer","elevation":1096.0,"units":"feet","display":{}}},{"type":"Feature","geometry":{"type":"LineString","coordinates":[[-96.2,41.19],[-96.21,41.2],[-96.2,41.19]]},"properties":{"type":"analysis_range","radius":500.0,"units":"feet","style":{}}}]}"#;

    struct FixedProvider {
        calls: Arc<AtomicUsize>,
    }

    impl ViewshedProvider for FixedProvider {
        fn compute_viewshed<'a>(&'a self, job: &'a EngineJob) -> EngineFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let height = job.mount_height;
            Box::pin(async move {
                if height > 100.0 {
                    Err(EngineFault::Failed {
                        code: Some(1),
                        diagnostics: "mast too tall".to_string(),
                    })
                } else {
                    Ok(OUTPUT.to_string())
                }
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn columns() -> Columns {
        Columns {
            lng: "lng".to_string(),
            lat: "lat".to_string(),
            height: "mount_height".to_string(),
            distance: "max_distance".to_string(),
        }
    }

    fn setup(csv: &str) -> (TempDir, ViewshedService, Arc<AtomicUsize>, PathBuf) {
        let dir = TempDir::new().unwrap();
        let dsm = dir.path().join("dsm.tif");
        std::fs::write(&dsm, b"dsm").unwrap();
        let input = dir.path().join("sites.csv");
        std::fs::write(&input, csv).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let service = ViewshedServiceBuilder::new(&dsm)
            .provider(FixedProvider {
                calls: calls.clone(),
            })
            .build();
        (dir, service, calls, input)
    }

    #[tokio::test]
    async fn test_batch_records_failures_per_row() {
        let csv = "name,lng,lat,mount_height\n\
                   a,-96.21095,41.1982,30\n\
                   b,-96.21095,95,30\n\
                   c,-96.21095,41.1982,150\n\
                   d,abc,41.1982,30\n";
        let (_dir, service, calls, input) = setup(csv);
        let output = default_output_path(&input);

        let summary = process_csv(&service, &input, &output, &columns())
            .await
            .unwrap();
        assert_eq!(summary, BatchSummary { total: 4, failed: 3 });
        // Only rows passing validation reach the engine
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.get(4), Some("visible_regions"));
        assert_eq!(headers.get(9), Some("error"));

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].get(4), Some("0"));
        assert_eq!(rows[0].get(7), Some("0.00"));
        assert_eq!(rows[0].get(8), Some("feet"));
        assert_eq!(rows[0].get(9), Some(""));
        assert!(rows[1].get(9).unwrap().contains("Latitude"));
        assert!(rows[2].get(9).unwrap().contains("status 1"));
        assert!(rows[3].get(9).unwrap().contains("Invalid longitude"));
    }

    #[tokio::test]
    async fn test_batch_missing_column() {
        let (_dir, service, _calls, input) = setup("lng,lat\n-96.2,41.1\n");
        let output = default_output_path(&input);

        let err = process_csv(&service, &input, &output, &columns())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mount_height"));
    }

    #[test]
    fn test_parse_site_optional_distance() {
        let indices = ColumnIndices {
            lng: 0,
            lat: 1,
            height: 2,
            distance: Some(3),
        };

        let record = csv::StringRecord::from(vec!["-96.2", "41.1", "30", ""]);
        let site = parse_site(&record, &indices).unwrap();
        assert_eq!(site, RawViewshedRequest::new(-96.2, 41.1, 30.0));

        let record = csv::StringRecord::from(vec!["-96.2", "41.1", "30", "800"]);
        let site = parse_site(&record, &indices).unwrap();
        assert_eq!(site.max_distance, Some(800.0));
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/towers.csv")),
            PathBuf::from("/tmp/towers_viewshed.csv")
        );
    }
}
