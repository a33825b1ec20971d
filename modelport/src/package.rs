//! Terminal stage: serializes the interchange document to disk, either as one
//! self-contained file or as a gzipped tar bundle pairing a reference-only
//! document with one payload entry per externalized constant.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::exchange::{self, ExchangeModel, TensorData};
use crate::ser;
use crate::store::ExternalTensorStore;

/// Hard ceiling of the interchange format for a single self-contained file.
pub const MAX_SINGLE_FILE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

pub const GRAPH_DOC_FILENAME: &str = "graph.mpx";
const TENSOR_EXTENSION: &str = "dat";

/// Writes the model to `dest`, applying `renames` at serialization time. With
/// a store, writes an archive bundle; without, a single file subject to the
/// format's size ceiling. Inputs are never mutated.
pub fn write(
    model: &ExchangeModel,
    store: Option<&ExternalTensorStore>,
    renames: &HashMap<String, String>,
    dest: impl AsRef<Path>,
) -> Result<()> {
    let mut document = model.clone();
    exchange::apply_renames(&mut document, renames);
    match store {
        Some(store) => write_archive(&document, store, dest.as_ref()),
        None => write_single(&document, dest.as_ref(), MAX_SINGLE_FILE_BYTES),
    }
}

/// Ceiling is a parameter so the limit check is testable without 2 GiB files.
pub fn write_single(model: &ExchangeModel, dest: &Path, ceiling: u64) -> Result<()> {
    let mut data = vec![];
    ser::write_model(&mut data, model)?;
    if data.len() as u64 > ceiling {
        return Err(Error::SizeExceeded { size: data.len() as u64, limit: ceiling });
    }
    fs::write(dest, &data)?;
    info!("model written to {:?} ({} bytes)", dest, data.len());
    Ok(())
}

fn write_archive(model: &ExchangeModel, store: &ExternalTensorStore, dest: &Path) -> Result<()> {
    for initializer in &model.graph.initializers {
        if let TensorData::External { key } = &initializer.data {
            if !store.contains(key) {
                return Err(Error::Malformed(format!(
                    "document references external tensor `{key}' absent from the store"
                )));
            }
        }
    }

    // the store is in memory already, so the whole bundle is staged there
    // too. dest only comes into existence once the archive is complete.
    let comp = flate2::write::GzEncoder::new(vec![], flate2::Compression::default());
    let mut ar = tar::Builder::new(comp);
    let now =
        std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH).unwrap();

    let mut graph_data = vec![];
    ser::write_model(&mut graph_data, model)?;
    append_entry(&mut ar, GRAPH_DOC_FILENAME, &graph_data, now.as_secs())?;

    for record in store.iter() {
        let mut data = vec![];
        ser::write_tensor_payload(&mut data, record)?;
        let filename = format!("{}.{}", record.key, TENSOR_EXTENSION);
        append_entry(&mut ar, &filename, &data, now.as_secs())?;
    }

    let bytes = ar.into_inner()?.finish()?;
    fs::write(dest, &bytes)?;
    info!("archived model written to {:?} ({} tensor entries)", dest, store.len());
    Ok(())
}

fn append_entry<W: std::io::Write>(
    ar: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(path)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_cksum();
    ar.append(&header, data)?;
    Ok(())
}

/// Reads back a single-file document.
pub fn read_single(path: impl AsRef<Path>) -> Result<ExchangeModel> {
    let data = fs::read(path.as_ref())?;
    ser::read_model(&mut &*data)
}

/// Reads back an archive bundle: the document plus its co-located records.
pub fn read_archive(path: impl AsRef<Path>) -> Result<(ExchangeModel, ExternalTensorStore)> {
    let file = fs::File::open(path.as_ref())?;
    let decomp = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decomp);
    let mut document = None;
    let mut store = ExternalTensorStore::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.to_path_buf();
        if entry_path.file_name().map(|n| n == GRAPH_DOC_FILENAME).unwrap_or(false) {
            document = Some(ser::read_model(&mut entry)?);
        } else if entry_path.extension().map(|e| e == TENSOR_EXTENSION).unwrap_or(false) {
            let mut key_path = entry_path.clone();
            key_path.set_extension("");
            let key = key_path.to_str().ok_or_else(|| {
                Error::Malformed(format!("badly encoded tensor entry name: {entry_path:?}"))
            })?;
            store.insert(ser::read_tensor_payload(&mut entry, key)?)?;
        }
    }
    let document = document.ok_or_else(|| {
        Error::Malformed(format!("archive contains no {GRAPH_DOC_FILENAME} document"))
    })?;
    Ok((document, store))
}

/// Re-inlines every external reference from the co-located store, as a
/// conforming reader would.
pub fn reconstruct(model: &mut ExchangeModel, store: &ExternalTensorStore) -> Result<()> {
    for initializer in &mut model.graph.initializers {
        if let TensorData::External { key } = &initializer.data {
            let record = store.get(key).ok_or_else(|| {
                Error::Malformed(format!("external tensor `{key}' absent from the store"))
            })?;
            initializer.data = TensorData::Inline(record.payload.clone());
        }
    }
    Ok(())
}
