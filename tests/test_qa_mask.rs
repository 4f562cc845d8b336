use ndarray::{Array3, ArrayD, ArrayViewD, IxDyn};
use qaseries::core::NoProgress;
use qaseries::io::field_name;
use qaseries::{
    ProductId, QaDefinitionTable, QaError, QaLayerArray, QaLayerSource, QaMaskBuilder, QaResult,
    UserSelection,
};
use std::cell::Cell;
use std::sync::Mutex;

fn definitions() -> QaDefinitionTable {
    QaDefinitionTable::from_decimal_rows(
        ProductId::new("MOD13Q1", "006").unwrap(),
        vec![
            ("MODLAND_QA", "VI produced, good quality", 0, 1),
            ("MODLAND_QA", "VI produced, but check other QA", 1, 1),
            ("MODLAND_QA", "Pixel produced, but most probably cloudy", 2, 1),
            ("MODLAND_QA", "Pixel not produced due to other reasons", 3, 1),
            ("Land/Water Mask", "Shallow ocean", 0, 1),
            ("Land/Water Mask", "Land", 1, 1),
            ("Land/Water Mask", "Ocean coastlines and lake shorelines", 2, 1),
        ],
    )
    .unwrap()
}

/// Layer where flag A is [T,T,F,T] for "good" and flag B is [T,F,T,T] for "Land"
fn layer() -> QaLayerArray<u16> {
    let modland = Array3::from_shape_vec((4, 1, 1), vec![0u16, 0, 10, 0]).unwrap();
    let land_water = Array3::from_shape_vec((4, 1, 1), vec![1u16, 0, 1, 1]).unwrap();
    QaLayerArray::from_cubes(1, vec![("MODLAND_QA", modland), ("Land/Water Mask", land_water)]).unwrap()
}

#[test]
fn test_combined_mask_is_and_of_flags() {
    let _ = env_logger::builder().is_test(true).try_init();

    let selection = UserSelection::new()
        .with_flag("MODLAND_QA", ["VI produced, good quality"])
        .with_flag("Land/Water Mask", ["Land"]);

    let mask = QaMaskBuilder::new()
        .build(&selection, &layer(), &definitions(), &NoProgress)
        .unwrap();

    let series: Vec<bool> = mask.iter().copied().collect();
    assert_eq!(series, vec![true, false, false, true]);
}

#[test]
fn test_value_matching_uses_digit_codes() {
    // "Pixel produced, but most probably cloudy" is catalogue value 2 -> "10" -> 10
    let selection = UserSelection::new()
        .with_flag("MODLAND_QA", ["Pixel produced, but most probably cloudy"])
        .with_flag("Land/Water Mask", ["Land", "Shallow ocean"]);

    let mask = QaMaskBuilder::with_parallel(false)
        .build(&selection, &layer(), &definitions(), &NoProgress)
        .unwrap();

    assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![false, false, true, false]);
}

#[test]
fn test_select_all_gives_all_true_mask() {
    let table = definitions();
    let selection = UserSelection::all_for(&table, 1).unwrap();

    // Every code present in the layer is a known value
    let modland = Array3::from_shape_fn((6, 3, 2), |(t, i, j)| [0u16, 1, 10, 11][(t + i + j) % 4]);
    let land_water = Array3::from_shape_fn((6, 3, 2), |(t, i, j)| [0u16, 1, 10][(t * i + j) % 3]);
    let layer = QaLayerArray::from_cubes(1, vec![("MODLAND_QA", modland), ("Land/Water Mask", land_water)])
        .unwrap();

    let mask = QaMaskBuilder::new().build(&selection, &layer, &table, &NoProgress).unwrap();
    assert_eq!(mask.dim(), (6, 3, 2));
    assert!(mask.iter().all(|&v| v));
}

#[test]
fn test_progress_once_per_flag_in_selection_order() {
    let reports = Mutex::new(Vec::new());
    let sink = |fraction: f64, label: &str| reports.lock().unwrap().push((fraction, label.to_string()));

    let selection = UserSelection::new()
        .with_flag("Land/Water Mask", ["Land"])
        .with_flag("MODLAND_QA", ["VI produced, good quality"]);

    let stack = QaMaskBuilder::new()
        .build_stack(&selection, &layer(), &definitions(), &sink)
        .unwrap();
    assert_eq!(stack.flags(), &["Land/Water Mask".to_string(), "MODLAND_QA".to_string()]);
    assert_eq!(stack.masks().dim(), (2, 4, 1, 1));

    let fractions: Vec<f64> = reports.into_inner().unwrap().into_iter().map(|(f, _)| f).collect();
    assert_eq!(fractions, vec![0.0, 0.5, 1.0]);
}

#[test]
fn test_selection_errors() {
    let builder = QaMaskBuilder::new();
    let table = definitions();
    let layer = layer();

    let empty = UserSelection::new();
    assert!(matches!(
        builder.build(&empty, &layer, &table, &NoProgress),
        Err(QaError::Selection(_))
    ));

    let missing_flag = UserSelection::new().with_flag("MODLAND_QA", ["VI produced, good quality"]);
    assert!(matches!(
        builder.build(&missing_flag, &layer, &table, &NoProgress),
        Err(QaError::Selection(_))
    ));

    let unknown_label = UserSelection::new()
        .with_flag("MODLAND_QA", ["Sunny"])
        .with_flag("Land/Water Mask", ["Land"]);
    assert!(matches!(
        builder.build(&unknown_label, &layer, &table, &NoProgress),
        Err(QaError::Selection(_))
    ));

    let empty_values = UserSelection::new()
        .with_flag("MODLAND_QA", Vec::<String>::new())
        .with_flag("Land/Water Mask", ["Land"]);
    assert!(matches!(
        builder.build(&empty_values, &layer, &table, &NoProgress),
        Err(QaError::Selection(_))
    ));
}

/// QA layer that counts field accesses
struct CountingLayer {
    dims: Vec<String>,
    shape: Vec<usize>,
    field: ArrayD<u8>,
    reads: Cell<usize>,
}

impl QaLayerSource for CountingLayer {
    type Code = u8;

    fn layer_id(&self) -> u32 {
        1
    }

    fn dims(&self) -> &[String] {
        &self.dims
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn field(&self, name: &str) -> QaResult<ArrayViewD<'_, u8>> {
        assert!(name == field_name("MODLAND_QA") || name == field_name("Land/Water Mask"));
        self.reads.set(self.reads.get() + 1);
        Ok(self.field.view())
    }
}

#[test]
fn test_missing_time_axis_fails_before_field_access() {
    let layer = CountingLayer {
        dims: vec!["latitude".to_string(), "longitude".to_string()],
        shape: vec![3, 2],
        field: ArrayD::zeros(IxDyn(&[3, 2])),
        reads: Cell::new(0),
    };
    let selection = UserSelection::all_for(&definitions(), 1).unwrap();

    let result = QaMaskBuilder::new().build(&selection, &layer, &definitions(), &NoProgress);
    assert!(matches!(result, Err(QaError::Dimension(_))));
    assert_eq!(layer.reads.get(), 0);
}

#[test]
fn test_field_shape_mismatch() {
    let layer = CountingLayer {
        dims: vec!["time".to_string(), "latitude".to_string(), "longitude".to_string()],
        shape: vec![4, 2, 2],
        field: ArrayD::zeros(IxDyn(&[4, 2, 3])),
        reads: Cell::new(0),
    };
    let selection = UserSelection::all_for(&definitions(), 1).unwrap();

    let result = QaMaskBuilder::new().build(&selection, &layer, &definitions(), &NoProgress);
    assert!(matches!(result, Err(QaError::Dimension(_))));
}
