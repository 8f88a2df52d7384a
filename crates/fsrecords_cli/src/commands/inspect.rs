//! Inspect command implementation.

use fsrecords_core::{CorruptionMarker, Header, StorePaths};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Records header, if it could be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderInfo>,
    /// Why the header could not be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_error: Option<String>,
    /// Files in the store directory.
    pub files: Vec<FileInfo>,
    /// Total size of the files in bytes.
    pub total_size: u64,
    /// Whether a rebuild is pending through the corruption marker.
    pub marker_present: bool,
}

/// Decoded header fields.
#[derive(Debug, Serialize)]
pub struct HeaderInfo {
    /// Records backend.
    pub kind: String,
    /// Record width in bytes.
    pub record_size: usize,
    /// Implementation version.
    pub version: u32,
    /// Connection status.
    pub status: String,
    /// Creation timestamp in epoch milliseconds.
    pub created_at: i64,
    /// Number of allocated records.
    pub records_count: u32,
    /// Global modification counter.
    pub global_mod_count: u32,
}

impl From<Header> for HeaderInfo {
    fn from(header: Header) -> Self {
        Self {
            kind: header.kind.to_string(),
            record_size: header.record_size,
            version: header.format_version,
            status: header.status.to_string(),
            created_at: header.created_at,
            records_count: header.records_count,
            global_mod_count: header.global_mod_count,
        }
    }
}

/// A file in the store directory.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Collects the inspection result for `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let paths = StorePaths::new(path);
    if !path.is_dir() {
        return Err(format!("No store directory at {}", path.display()).into());
    }

    let mut files = Vec::new();
    for file in paths.list_files()? {
        let metadata = std::fs::metadata(&file)?;
        if !metadata.is_file() {
            continue;
        }
        files.push(FileInfo {
            name: file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: metadata.len(),
        });
    }
    let total_size = files.iter().map(|f| f.size).sum();

    let (header, header_error) = if paths.records().exists() {
        match Header::read_from(&paths.records()) {
            Ok(header) => (Some(HeaderInfo::from(header)), None),
            Err(e) => (None, Some(e.to_string())),
        }
    } else {
        (None, Some("records file not found".to_string()))
    };

    Ok(InspectResult {
        path: path.display().to_string(),
        header,
        header_error,
        files,
        total_size,
        marker_present: CorruptionMarker::new(paths.marker()).exists(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();

    match (&result.header, &result.header_error) {
        (Some(header), _) => {
            println!("Header:");
            println!("  Backend:          {}", header.kind);
            println!("  Record size:      {} bytes", header.record_size);
            println!("  Version:          {}", header.version);
            println!("  Status:           {}", header.status);
            println!("  Created at:       {}", header.created_at);
            println!("  Records:          {}", header.records_count);
            println!("  Mod count:        {}", header.global_mod_count);
        }
        (None, Some(error)) => println!("Header: unreadable ({error})"),
        (None, None) => println!("Header: unreadable"),
    }
    println!();

    println!("Files:");
    for file in &result.files {
        println!("  {:<24} {:>12} bytes", file.name, file.size);
    }
    println!("  {:<24} {:>12} bytes", "total", result.total_size);
    println!();

    if result.marker_present {
        println!("Corruption marker present: rebuild pending");
    }
}
