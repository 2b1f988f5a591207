use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

use reqwest::Client;

use crate::error::{AppError, Context, Result};

const NASDAQ_LISTED_URL: &str = "https://www.nasdaqtrader.com/dynamic/SymDir/nasdaqlisted.txt";
const OTHER_LISTED_URL: &str = "https://www.nasdaqtrader.com/dynamic/SymDir/otherlisted.txt";

/// Load the flat one-column `Symbol` CSV produced by `save_symbols`.
/// A missing or empty file is an error; the ingestor treats it as fatal at startup.
pub fn load_symbols<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open symbol file {}", path.display()))?;

    let mut symbols = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read symbol record")?;
        if let Some(symbol) = record.get(0) {
            let symbol = symbol.trim();
            if !symbol.is_empty() {
                symbols.push(symbol.to_string());
            }
        }
    }

    if symbols.is_empty() {
        return Err(AppError::message(format!(
            "Symbol file {} contains no symbols",
            path.display()
        )));
    }

    Ok(symbols)
}

/// Persist the symbol universe as a one-column CSV with a `Symbol` header.
pub fn save_symbols<P: AsRef<Path>>(path: P, symbols: &[String]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path.as_ref()).context("Failed to create symbol CSV writer")?;

    writer.write_record(["Symbol"])?;
    for symbol in symbols {
        writer.write_record([symbol])?;
    }

    writer.flush()?;
    Ok(())
}

/// Download the NASDAQ and other-exchange listing files and merge them into a
/// deduplicated symbol universe, preserving first-seen order.
pub async fn fetch_symbol_universe(client: &Client) -> Result<Vec<String>> {
    let nasdaq = download_listing(client, NASDAQ_LISTED_URL).await?;
    let other = download_listing(client, OTHER_LISTED_URL).await?;

    let mut symbols = parse_listing(&nasdaq, "Symbol")?;
    symbols.extend(parse_listing(&other, "ACT Symbol")?);

    let mut seen = HashSet::new();
    symbols.retain(|symbol| seen.insert(symbol.clone()));

    Ok(symbols)
}

async fn download_listing(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Listing request failed for {}", url))?;

    if !response.status().is_success() {
        return Err(AppError::message(format!(
            "Listing request for {} failed with status {}",
            url,
            response.status()
        )));
    }

    Ok(response.text().await?)
}

/// Parse one pipe-delimited listing file and return the trimmed values of the
/// named symbol column, skipping blanks and the file-creation-time footer row.
fn parse_listing(body: &str, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(body));

    let headers = reader.headers().context("Listing file has no header")?;
    let column_index = headers
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| AppError::message(format!("Column {} not found in listing file", column)))?;

    let mut symbols = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read listing record")?;

        let Some(first) = record.get(0) else {
            continue;
        };
        if first.starts_with("File Creation Time") {
            continue;
        }

        let Some(symbol) = record.get(column_index) else {
            continue;
        };
        let symbol = symbol.trim();
        if !symbol.is_empty() {
            symbols.push(symbol.to_string());
        }
    }

    Ok(symbols)
}
