//! Runs detection over a CSV file with a YAML rule file and prints the report.
//!
//! The example writes a small product catalogue, two local product images and
//! a rule file into a temporary directory, then:
//! - loads the CSV into a dataset
//! - applies numeric, text, category and image rules
//! - prints the skipped-rule summary and the text report
//!
//! Run with:
//! ```bash
//! cargo run --example detect_from_files
//! ```

use datafusion::prelude::SessionContext;
use std::path::Path;
use term_detect::config::DetectionConfig;
use term_detect::core::Detector;
use term_detect::logging::setup::{init_logging, LoggingConfig};
use term_detect::report::{write_report, HumanFormatter, ReportFormatter, Reporter};
use term_detect::sources::{load_csv, CsvOptions};

const RULES: &str = r#"
rules:
  - type: NUMERIC
    name: price
    on_column: price
    range: {min: 0, max: 1000}
    statistics: {z_score_threshold: 2.0}
  - type: TEXT
    name: contact
    on_column: email
    format: {type: EMAIL}
    constraints:
      - kind: IS_NOT_NULL
  - type: CATEGORY
    name: category
    on_column: category
    valid_categories: [books, games, music]
  - type: IMAGE_RESOLUTION
    name: min_width
    on_column: image
    dimension: width
    constraints:
      - kind: GREATER_THAN
        value: 100
  - type: IMAGE_FORMAT
    name: format
    on_column: image
    allowed_formats: [.png, .jpg]
  - type: IMAGE_FACE_COUNT
    name: faces
    on_column: image
"#;

fn write_image(path: &Path, width: u32, height: u32) -> Result<(), Box<dyn std::error::Error>> {
    let image = image::GrayImage::from_fn(width, height, |x, y| {
        image::Luma([((x * 7 + y * 13) % 256) as u8])
    });
    image.save(path)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default().with_detect_level(tracing::Level::INFO))?;

    let dir = std::env::temp_dir().join("term-detect-demo");
    std::fs::create_dir_all(&dir)?;
    let large = dir.join("large.png");
    let small = dir.join("small.png");
    write_image(&large, 320, 240)?;
    write_image(&small, 64, 48)?;

    let csv = format!(
        "id,price,email,category,image\n\
         1,19.99,ann@example.com,books,{large}\n\
         2,-4.00,bob@example,games,{small}\n\
         3,25.50,,toys,{missing}\n\
         4,9999.00,dee@example.org,music,{large}\n",
        large = large.display(),
        small = small.display(),
        missing = dir.join("missing.gif").display(),
    );
    let csv_path = dir.join("products.csv");
    std::fs::write(&csv_path, csv)?;

    let ctx = SessionContext::new();
    let dataset = load_csv(&ctx, &csv_path, CsvOptions::default()).await?;
    let config = DetectionConfig::from_yaml(RULES)?;

    println!("Running {} rules...\n", config.rules.len());
    let outcome = Detector::new().detect_issues(dataset, &config.rules).await?;
    // IMAGE_FACE_COUNT is skipped: no face detector is configured.
    println!("{}\n", outcome.summary());

    let report = Reporter::from_outcome(&outcome).generate().await?;
    let formatter = HumanFormatter::new().with_max_indexes(10);
    println!("{}", formatter.format(&report)?);

    let report_path = dir.join("report.txt");
    write_report(&report, &report_path, &formatter)?;
    println!("Report written to {}", report_path.display());

    Ok(())
}
