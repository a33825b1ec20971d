//! Rename cascade: merges signature-derived renames with explicit
//! caller-supplied lists into one old-name to new-name map. The map is applied
//! at serialization time by the packager, never here.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Precedence, lowest first: signature-derived renames, explicit output
/// renames, explicit input renames. Later entries overwrite earlier ones for
/// the same old name. Explicit lists correspond positionally to the declared
/// inputs/outputs.
pub fn build_rename_map(
    signature_renames: &HashMap<String, String>,
    inputs: &[String],
    outputs: &[String],
    rename_inputs: Option<&[String]>,
    rename_outputs: Option<&[String]>,
) -> Result<HashMap<String, String>> {
    let mut map = signature_renames.clone();
    if let Some(new_names) = rename_outputs {
        if new_names.len() != outputs.len() {
            return Err(Error::RenameCountMismatch {
                side: "output",
                expected: outputs.len(),
                got: new_names.len(),
            });
        }
        map.extend(outputs.iter().cloned().zip(new_names.iter().cloned()));
    }
    if let Some(new_names) = rename_inputs {
        if new_names.len() != inputs.len() {
            return Err(Error::RenameCountMismatch {
                side: "input",
                expected: inputs.len(),
                got: new_names.len(),
            });
        }
        map.extend(inputs.iter().cloned().zip(new_names.iter().cloned()));
    }
    check_collisions(&map)?;
    Ok(map)
}

/// Two distinct old names must never map to the same new name.
fn check_collisions(map: &HashMap<String, String>) -> Result<()> {
    let mut seen: HashMap<&String, &String> = HashMap::new();
    for (old, new) in map {
        if let Some(prev) = seen.insert(new, old) {
            let (first, second) = if prev < old { (prev, old) } else { (old, prev) };
            return Err(Error::RenameCollision {
                first: first.to_string(),
                second: second.to_string(),
                new_name: new.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merges_all_three_layers() {
        let signature: HashMap<String, String> =
            [("a:0".to_string(), "x".to_string()), ("b:0".to_string(), "y".to_string())].into();
        let map = build_rename_map(
            &signature,
            &strings(&["a:0"]),
            &strings(&["b:0"]),
            Some(&strings(&["input"])),
            Some(&strings(&["output"])),
        )
        .unwrap();
        assert_eq!(map["a:0"], "input");
        assert_eq!(map["b:0"], "output");
    }

    #[test]
    fn explicit_input_renames_beat_output_renames() {
        // same old name in both explicit lists: inputs are applied last
        let map = build_rename_map(
            &HashMap::new(),
            &strings(&["t:0"]),
            &strings(&["t:0"]),
            Some(&strings(&["as_input"])),
            Some(&strings(&["as_output"])),
        )
        .unwrap();
        assert_eq!(map["t:0"], "as_input");
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let err = build_rename_map(
            &HashMap::new(),
            &strings(&["a:0", "b:0"]),
            &strings(&["c:0"]),
            Some(&strings(&["only_one"])),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::RenameCountMismatch { side: "input", expected: 2, got: 1 }));
    }

    #[test]
    fn collision_is_detected() {
        let err = build_rename_map(
            &HashMap::new(),
            &strings(&["a:0", "b:0"]),
            &strings(&[]),
            Some(&strings(&["same", "same"])),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::RenameCollision { new_name, .. } if new_name == "same"));
    }

    #[test]
    fn no_lists_returns_signature_renames_unchanged() {
        let signature: HashMap<String, String> = [("a:0".to_string(), "x".to_string())].into();
        let map =
            build_rename_map(&signature, &strings(&["a:0"]), &strings(&["b:0"]), None, None)
                .unwrap();
        assert_eq!(map, signature);
    }
}
