//! Binary codec for the interchange document and for the per-tensor payload
//! entries of an archive bundle. Little-endian, length-prefixed strings.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::custom_ops::OpsetId;
use crate::error::{Error, Result};
use crate::exchange::{
    ExchangeGraph, ExchangeModel, ExchangeNode, Initializer, TensorData,
};
use crate::store::ConstantRecord;

const MAGIC: &[u8; 4] = b"MPXG";
const FORMAT_VERSION: u32 = 1;

const DATA_INLINE: u8 = 0;
const DATA_EXTERNAL: u8 = 1;

pub fn write_model<W: Write>(w: &mut W, model: &ExchangeModel) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    write_str(w, &model.producer)?;
    write_str(w, &model.description)?;
    w.write_i64::<LittleEndian>(model.opset_version)?;
    w.write_u32::<LittleEndian>(model.opsets.len() as u32)?;
    for opset in &model.opsets {
        write_str(w, &opset.domain)?;
        w.write_i64::<LittleEndian>(opset.version)?;
    }
    write_str(w, &model.graph.name)?;
    write_strs(w, &model.graph.inputs)?;
    write_strs(w, &model.graph.outputs)?;
    w.write_u32::<LittleEndian>(model.graph.nodes.len() as u32)?;
    for node in &model.graph.nodes {
        write_str(w, &node.name)?;
        write_str(w, &node.op)?;
        write_str(w, &node.domain)?;
        write_strs(w, &node.inputs)?;
        write_strs(w, &node.outputs)?;
    }
    w.write_u32::<LittleEndian>(model.graph.initializers.len() as u32)?;
    for initializer in &model.graph.initializers {
        write_str(w, &initializer.name)?;
        w.write_i32::<LittleEndian>(initializer.dtype)?;
        write_dims(w, &initializer.shape)?;
        match &initializer.data {
            TensorData::Inline(payload) => {
                w.write_u8(DATA_INLINE)?;
                w.write_u64::<LittleEndian>(payload.len() as u64)?;
                w.write_all(payload)?;
            }
            TensorData::External { key } => {
                w.write_u8(DATA_EXTERNAL)?;
                write_str(w, key)?;
            }
        }
    }
    Ok(())
}

pub fn read_model<R: Read>(r: &mut R) -> Result<ExchangeModel> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Malformed("bad magic, not an interchange document".to_string()));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(Error::Malformed(format!("unsupported document version {version}")));
    }
    let producer = read_str(r)?;
    let description = read_str(r)?;
    let opset_version = r.read_i64::<LittleEndian>()?;
    let mut opsets = vec![];
    for _ in 0..r.read_u32::<LittleEndian>()? {
        let domain = read_str(r)?;
        let version = r.read_i64::<LittleEndian>()?;
        opsets.push(OpsetId { domain, version });
    }
    let name = read_str(r)?;
    let inputs = read_strs(r)?;
    let outputs = read_strs(r)?;
    let mut nodes = vec![];
    for _ in 0..r.read_u32::<LittleEndian>()? {
        nodes.push(ExchangeNode {
            name: read_str(r)?,
            op: read_str(r)?,
            domain: read_str(r)?,
            inputs: read_strs(r)?,
            outputs: read_strs(r)?,
        });
    }
    let mut initializers = vec![];
    for _ in 0..r.read_u32::<LittleEndian>()? {
        let name = read_str(r)?;
        let dtype = r.read_i32::<LittleEndian>()?;
        let shape = read_dims(r)?;
        let data = match r.read_u8()? {
            DATA_INLINE => {
                let len = r.read_u64::<LittleEndian>()?;
                let mut payload = vec![0u8; len as usize];
                r.read_exact(&mut payload)?;
                TensorData::Inline(payload)
            }
            DATA_EXTERNAL => TensorData::External { key: read_str(r)? },
            tag => return Err(Error::Malformed(format!("unknown tensor data tag {tag}"))),
        };
        initializers.push(Initializer { name, dtype, shape, data });
    }
    Ok(ExchangeModel {
        producer,
        description,
        opset_version,
        opsets,
        graph: ExchangeGraph { name, inputs, outputs, nodes, initializers },
    })
}

/// Archive payload entry: dtype, dims, then the raw bytes.
pub fn write_tensor_payload<W: Write>(w: &mut W, record: &ConstantRecord) -> Result<()> {
    w.write_i32::<LittleEndian>(record.dtype)?;
    write_dims(w, &record.shape)?;
    w.write_u64::<LittleEndian>(record.payload.len() as u64)?;
    w.write_all(&record.payload)?;
    Ok(())
}

pub fn read_tensor_payload<R: Read>(r: &mut R, key: &str) -> Result<ConstantRecord> {
    let dtype = r.read_i32::<LittleEndian>()?;
    let shape = read_dims(r)?;
    let len = r.read_u64::<LittleEndian>()?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(ConstantRecord { key: key.to_string(), dtype, shape, payload })
}

fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()?;
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| Error::Malformed("string is not valid utf-8".to_string()))
}

fn write_strs<W: Write>(w: &mut W, strings: &[String]) -> Result<()> {
    w.write_u32::<LittleEndian>(strings.len() as u32)?;
    for s in strings {
        write_str(w, s)?;
    }
    Ok(())
}

fn read_strs<R: Read>(r: &mut R) -> Result<Vec<String>> {
    let count = r.read_u32::<LittleEndian>()?;
    (0..count).map(|_| read_str(r)).collect()
}

fn write_dims<W: Write>(w: &mut W, dims: &[i64]) -> Result<()> {
    w.write_u32::<LittleEndian>(dims.len() as u32)?;
    for dim in dims {
        w.write_i64::<LittleEndian>(*dim)?;
    }
    Ok(())
}

fn read_dims<R: Read>(r: &mut R) -> Result<Vec<i64>> {
    let count = r.read_u32::<LittleEndian>()?;
    (0..count).map(|_| Ok(r.read_i64::<LittleEndian>()?)).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_model() -> ExchangeModel {
        ExchangeModel {
            producer: "modelport test".to_string(),
            description: "converted from nowhere".to_string(),
            opset_version: 13,
            opsets: vec![OpsetId::new("com.acme", 2)],
            graph: ExchangeGraph {
                name: "graph".to_string(),
                inputs: vec!["x:0".to_string()],
                outputs: vec!["y:0".to_string()],
                nodes: vec![ExchangeNode {
                    name: "y".to_string(),
                    op: "MatMul".to_string(),
                    domain: String::new(),
                    inputs: vec!["x:0".to_string(), "w:0".to_string()],
                    outputs: vec!["y:0".to_string()],
                }],
                initializers: vec![
                    Initializer {
                        name: "w:0".to_string(),
                        dtype: 1,
                        shape: vec![2, 2],
                        data: TensorData::Inline(vec![1, 2, 3, 4]),
                    },
                    Initializer {
                        name: "big:0".to_string(),
                        dtype: 1,
                        shape: vec![1024],
                        data: TensorData::External { key: "big".to_string() },
                    },
                ],
            },
        }
    }

    #[test]
    fn document_round_trip() {
        let model = sample_model();
        let mut data = vec![];
        write_model(&mut data, &model).unwrap();
        let decoded = read_model(&mut &*data).unwrap();
        assert_eq!(decoded, model);
    }

    #[test]
    fn rejects_foreign_files() {
        let mut data = b"not a model at all".to_vec();
        data.resize(64, 0);
        assert!(matches!(read_model(&mut &*data), Err(Error::Malformed(_))));
    }

    #[test]
    fn tensor_payload_round_trip() {
        let record = ConstantRecord {
            key: "w".to_string(),
            dtype: 1,
            shape: vec![4, 2],
            payload: (0..64).collect(),
        };
        let mut data = vec![];
        write_tensor_payload(&mut data, &record).unwrap();
        assert_eq!(read_tensor_payload(&mut &*data, "w").unwrap(), record);
    }
}
