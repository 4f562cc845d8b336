//! QA selection -> validity mask.
//!
//! For each selected flag the decoded QA field is compared against the
//! field code of every accepted value and the comparisons are OR-ed. The
//! per-flag masks are then AND-ed into a single (time, lat, lon) mask.

use crate::core::progress::{ProgressSink, ProgressTracker};
use crate::core::selection::UserSelection;
use crate::io::{field_name, QaDefinitionTable, QaLayerSource};
use crate::types::{validate_cube_dims, CombinedMask, MaskCube, QaError, QaResult};
use ndarray::{Array3, ArrayView3, Axis, Ix3, Zip};
use num_traits::NumCast;

const MASK_LABEL: &str = "Masking by user QA selection";

/// Per-flag masks, one slice per selected flag in selection order
#[derive(Debug, Clone)]
pub struct MaskStack {
    flags: Vec<String>,
    masks: MaskCube,
}

impl MaskStack {
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// (flag, time, lat, lon) boolean cube
    pub fn masks(&self) -> &MaskCube {
        &self.masks
    }

    /// Logical AND across all flag slices
    pub fn combine(&self) -> QaResult<CombinedMask> {
        let mut slices = self.masks.axis_iter(Axis(0));
        let first = slices.next().ok_or_else(|| {
            QaError::Selection("cannot combine a mask stack without flags".to_string())
        })?;

        let mut combined = first.to_owned();
        for slice in slices {
            Zip::from(&mut combined).and(&slice).for_each(|c, &m| *c &= m);
        }

        Ok(combined)
    }
}

/// A selected flag resolved against the definition table
#[derive(Debug, Clone)]
struct ResolvedFlag<C> {
    flag: String,
    field: String,
    /// (value-label, field code)
    codes: Vec<(String, C)>,
}

/// Builds validity masks from a user QA selection
#[derive(Debug, Clone)]
pub struct QaMaskBuilder {
    enable_parallel: bool,
}

impl Default for QaMaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QaMaskBuilder {
    /// Create a mask builder using parallel elementwise comparison
    pub fn new() -> Self {
        Self {
            enable_parallel: true,
        }
    }

    pub fn with_parallel(enable_parallel: bool) -> Self {
        Self { enable_parallel }
    }

    /// Build the combined validity mask for `selection`
    pub fn build<L: QaLayerSource>(
        &self,
        selection: &UserSelection,
        layer: &L,
        definitions: &QaDefinitionTable,
        progress: &dyn ProgressSink,
    ) -> QaResult<CombinedMask> {
        let stack = self.build_stack(selection, layer, definitions, progress)?;
        let combined = stack.combine()?;

        let valid = combined.iter().filter(|&&v| v).count();
        log::info!(
            "Combined mask from {} flags: {}/{} observations valid",
            stack.flags().len(),
            valid,
            combined.len()
        );

        Ok(combined)
    }

    /// Build one mask slice per selected flag
    pub fn build_stack<L: QaLayerSource>(
        &self,
        selection: &UserSelection,
        layer: &L,
        definitions: &QaDefinitionTable,
        progress: &dyn ProgressSink,
    ) -> QaResult<MaskStack> {
        // Step 1: layer axes, before touching any field
        validate_cube_dims(layer.dims(), &format!("QA layer {}", layer.layer_id()))?;
        let shape = match layer.shape() {
            &[t, lat, lon] => (t, lat, lon),
            other => {
                return Err(QaError::Dimension(format!(
                    "QA layer {} has shape {:?}, expected (time, latitude, longitude)",
                    layer.layer_id(),
                    other
                )))
            }
        };

        // Step 2: selection against the definitions of this layer
        let resolved = Self::resolve_selection::<L::Code>(selection, definitions, layer.layer_id())?;

        // Step 3: every field exists with the layer shape
        let mut fields: Vec<ArrayView3<'_, L::Code>> = Vec::with_capacity(resolved.len());
        for flag in &resolved {
            let field = layer
                .field(&flag.field)?
                .into_dimensionality::<Ix3>()
                .map_err(|e| {
                    QaError::Dimension(format!(
                        "QA layer {} field '{}': {}",
                        layer.layer_id(),
                        flag.field,
                        e
                    ))
                })?;

            if field.dim() != shape {
                return Err(QaError::Dimension(format!(
                    "QA layer {} field '{}' has shape {:?}, expected {:?}",
                    layer.layer_id(),
                    flag.field,
                    field.dim(),
                    shape
                )));
            }
            fields.push(field);
        }

        log::info!(
            "Building QA mask for layer {} from {} flags over {:?} (time, lat, lon)",
            layer.layer_id(),
            resolved.len(),
            shape
        );

        // Step 4: OR within a flag, one slice per flag
        let tracker = ProgressTracker::new(progress, MASK_LABEL, resolved.len());
        tracker.start();

        let mut slices: Vec<Array3<bool>> = Vec::with_capacity(resolved.len());
        for (flag, field) in resolved.iter().zip(fields.iter()) {
            log::debug!(
                "Flag '{}' (field '{}'): accepting {:?}",
                flag.flag,
                flag.field,
                flag.codes.iter().map(|(label, _)| label.as_str()).collect::<Vec<_>>()
            );
            slices.push(self.flag_mask(field, &flag.codes));
            tracker.advance();
        }

        let views: Vec<_> = slices.iter().map(|s| s.view()).collect();
        let masks = ndarray::stack(Axis(0), &views)
            .map_err(|e| QaError::Dimension(format!("cannot stack flag masks: {}", e)))?;

        Ok(MaskStack {
            flags: resolved.into_iter().map(|r| r.flag).collect(),
            masks,
        })
    }

    /// Check the selection against the layer's definitions and resolve field codes
    fn resolve_selection<C: NumCast>(
        selection: &UserSelection,
        definitions: &QaDefinitionTable,
        layer_id: u32,
    ) -> QaResult<Vec<ResolvedFlag<C>>> {
        if selection.is_empty() {
            return Err(QaError::Selection("no QA flags selected".to_string()));
        }

        let layer_flags = definitions.flags(layer_id);
        if layer_flags.is_empty() {
            return Err(QaError::Selection(format!(
                "{} defines no flags for QA layer {}",
                definitions.product(),
                layer_id
            )));
        }

        let mut resolved = Vec::with_capacity(selection.len());
        for entry in selection.entries() {
            if !layer_flags.contains(&entry.flag.as_str()) {
                return Err(QaError::Selection(format!(
                    "flag '{}' is not defined for QA layer {} (flags: {:?})",
                    entry.flag, layer_id, layer_flags
                )));
            }

            if entry.values.is_empty() {
                return Err(QaError::Selection(format!("flag '{}' has no selected values", entry.flag)));
            }

            let mut codes = Vec::with_capacity(entry.values.len());
            for label in &entry.values {
                let definition = definitions.lookup(layer_id, &entry.flag, label).ok_or_else(|| {
                    QaError::Selection(format!(
                        "value '{}' is not defined for flag '{}' in QA layer {}",
                        label, entry.flag, layer_id
                    ))
                })?;

                let field_code = definition.bit_pattern.field_code()?;
                let code = <C as NumCast>::from(field_code).ok_or_else(|| {
                    QaError::Selection(format!(
                        "bit pattern {} of '{}'/'{}' does not fit the QA layer codes",
                        definition.bit_pattern, entry.flag, label
                    ))
                })?;
                codes.push((label.clone(), code));
            }

            resolved.push(ResolvedFlag {
                flag: entry.flag.clone(),
                field: field_name(&entry.flag),
                codes,
            });
        }

        for flag in &layer_flags {
            if selection.get(flag).is_none() {
                return Err(QaError::Selection(format!(
                    "flag '{}' of QA layer {} is missing from the selection",
                    flag, layer_id
                )));
            }
        }

        Ok(resolved)
    }

    fn flag_mask<C>(&self, field: &ArrayView3<'_, C>, codes: &[(String, C)]) -> Array3<bool>
    where
        C: Copy + PartialEq + Send + Sync,
    {
        let mut mask = Array3::from_elem(field.raw_dim(), false);
        for &(_, code) in codes {
            if self.enable_parallel {
                or_equal_parallel(&mut mask, field, code);
            } else {
                Zip::from(&mut mask).and(field).for_each(|m, &v| *m |= v == code);
            }
        }
        mask
    }
}

#[cfg(feature = "parallel")]
fn or_equal_parallel<C>(mask: &mut Array3<bool>, field: &ArrayView3<'_, C>, code: C)
where
    C: Copy + PartialEq + Send + Sync,
{
    Zip::from(mask).and(field).par_for_each(|m, &v| *m |= v == code);
}

#[cfg(not(feature = "parallel"))]
fn or_equal_parallel<C>(mask: &mut Array3<bool>, field: &ArrayView3<'_, C>, code: C)
where
    C: Copy + PartialEq + Send + Sync,
{
    Zip::from(mask).and(field).for_each(|m, &v| *m |= v == code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::NoProgress;
    use crate::io::{ProductId, QaLayerArray};
    use ndarray::{arr3, Array4};

    fn definitions() -> QaDefinitionTable {
        QaDefinitionTable::from_decimal_rows(
            ProductId::new("MOD13A2", "006").unwrap(),
            vec![
                ("Cloud State", "Clear", 0, 1),
                ("Cloud State", "Cloudy", 1, 1),
                ("Cloud State", "Mixed", 2, 1),
                ("Aerosol Quantity", "Low", 1, 1),
                ("Aerosol Quantity", "High", 3, 1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_values_of_one_flag_are_ored() {
        let builder = QaMaskBuilder::with_parallel(false);
        // Field codes: Clear = 0, Cloudy = 1, Mixed = 10
        let field = arr3(&[[[0u8, 1, 10, 0]]]);
        let codes = vec![("Clear".to_string(), 0u8), ("Mixed".to_string(), 10u8)];

        let mask = builder.flag_mask(&field.view(), &codes);
        assert_eq!(mask, arr3(&[[[true, false, true, true]]]));
    }

    #[test]
    fn test_combine_is_and_across_flags() {
        let a = [true, true, false, true];
        let b = [true, false, true, true];
        let masks = Array4::from_shape_fn((2, 4, 1, 1), |(f, t, _, _)| if f == 0 { a[t] } else { b[t] });
        let stack = MaskStack {
            flags: vec!["A".to_string(), "B".to_string()],
            masks,
        };

        let combined = stack.combine().unwrap();
        let values: Vec<bool> = combined.iter().copied().collect();
        assert_eq!(values, vec![true, false, false, true]);
    }

    #[test]
    fn test_combining_zero_flags_is_rejected() {
        let stack = MaskStack {
            flags: Vec::new(),
            masks: Array4::from_elem((0, 2, 2, 2), true),
        };
        assert!(matches!(stack.combine(), Err(QaError::Selection(_))));
    }

    #[test]
    fn test_pattern_compared_as_digit_code() {
        // "High" is catalogue value 3 -> bits "11" -> field code 11
        let layer = QaLayerArray::from_cubes(
            1,
            vec![
                ("Cloud State", Array3::<u16>::zeros((1, 1, 3))),
                ("Aerosol Quantity", arr3(&[[[3u16, 11, 1]]])),
            ],
        )
        .unwrap();
        let selection = UserSelection::new()
            .with_flag("Cloud State", ["Clear"])
            .with_flag("Aerosol Quantity", ["High"]);

        let mask = QaMaskBuilder::new()
            .build(&selection, &layer, &definitions(), &NoProgress)
            .unwrap();
        assert_eq!(mask, arr3(&[[[false, true, false]]]));
    }

    #[test]
    fn test_selection_errors() {
        let defs = definitions();

        assert!(QaMaskBuilder::resolve_selection::<u8>(&UserSelection::new(), &defs, 1).is_err());

        let unknown_flag = UserSelection::all_for(&defs, 1).unwrap().with_flag("Snow", ["Yes"]);
        let err = QaMaskBuilder::resolve_selection::<u8>(&unknown_flag, &defs, 1).unwrap_err();
        assert!(err.to_string().contains("Snow"));

        let unknown_value = UserSelection::all_for(&defs, 1).unwrap().with_flag("Cloud State", ["Foggy"]);
        let err = QaMaskBuilder::resolve_selection::<u8>(&unknown_value, &defs, 1).unwrap_err();
        assert!(err.to_string().contains("Foggy"));

        let empty_values = UserSelection::all_for(&defs, 1)
            .unwrap()
            .with_flag("Cloud State", Vec::<String>::new());
        assert!(matches!(
            QaMaskBuilder::resolve_selection::<u8>(&empty_values, &defs, 1),
            Err(QaError::Selection(_))
        ));

        let missing_flag = UserSelection::new().with_flag("Cloud State", ["Clear"]);
        let err = QaMaskBuilder::resolve_selection::<u8>(&missing_flag, &defs, 1).unwrap_err();
        assert!(err.to_string().contains("Aerosol Quantity"));
    }
}
