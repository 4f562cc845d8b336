use crate::types::{validate_cube_dims, Coordinates, QaError, QaResult, CUBE_DIMS};
use ndarray::{ArrayD, ArrayViewD};
use num_traits::{NumCast, PrimInt};
use std::collections::HashMap;

/// Field name of a decoded QA flag ("Land/Water Flag" -> "Land_Water_Flag")
pub fn field_name(flag: &str) -> String {
    flag.replace([' ', '/'], "_")
}

/// Access to the decoded bit groups of one QA layer.
///
/// Every field is a (time, latitude, longitude) cube of integer codes.
pub trait QaLayerSource {
    type Code: PrimInt + NumCast + Send + Sync;

    fn layer_id(&self) -> u32;

    /// Axis names shared by all fields
    fn dims(&self) -> &[String];

    /// Shape shared by all fields
    fn shape(&self) -> &[usize];

    /// Decoded field by normalised name, see [`field_name`]
    fn field(&self, name: &str) -> QaResult<ArrayViewD<'_, Self::Code>>;

    /// Time and grid coordinates of the fields, when the reader has them
    fn coords(&self) -> Option<&Coordinates> {
        None
    }
}

/// In-memory QA layer: a name -> array mapping built once at load time
#[derive(Debug, Clone)]
pub struct QaLayerArray<C> {
    layer_id: u32,
    dims: Vec<String>,
    shape: Vec<usize>,
    fields: HashMap<String, ArrayD<C>>,
    coords: Option<Coordinates>,
}

impl<C> QaLayerArray<C>
where
    C: PrimInt + NumCast + Send + Sync,
{
    /// Create a layer from decoded fields sharing the given axes.
    ///
    /// Field names are normalised with [`field_name`]. All fields must have
    /// the same shape and one axis per name in `dims`.
    pub fn new<I, S>(layer_id: u32, dims: Vec<String>, fields: I) -> QaResult<Self>
    where
        I: IntoIterator<Item = (S, ArrayD<C>)>,
        S: AsRef<str>,
    {
        let mut shape: Option<Vec<usize>> = None;
        let mut map = HashMap::new();

        for (name, array) in fields {
            let name = field_name(name.as_ref());

            if array.ndim() != dims.len() {
                return Err(QaError::Dimension(format!(
                    "QA layer {} field '{}' has {} axes, layer axes are {:?}",
                    layer_id,
                    name,
                    array.ndim(),
                    dims
                )));
            }

            match &shape {
                Some(expected) if expected.as_slice() != array.shape() => {
                    return Err(QaError::Dimension(format!(
                        "QA layer {} field '{}' has shape {:?}, expected {:?}",
                        layer_id,
                        name,
                        array.shape(),
                        expected
                    )));
                }
                Some(_) => {}
                None => shape = Some(array.shape().to_vec()),
            }

            if map.insert(name.clone(), array).is_some() {
                return Err(QaError::Definition(format!(
                    "QA layer {} has field '{}' more than once",
                    layer_id, name
                )));
            }
        }

        let shape = shape.ok_or_else(|| {
            QaError::Definition(format!("QA layer {} has no decoded fields", layer_id))
        })?;

        log::debug!("QA layer {} loaded with {} fields of shape {:?}", layer_id, map.len(), shape);

        Ok(Self {
            layer_id,
            dims,
            shape,
            fields: map,
            coords: None,
        })
    }

    /// Create a layer whose fields are already (time, latitude, longitude) cubes
    pub fn from_cubes<I, S>(layer_id: u32, fields: I) -> QaResult<Self>
    where
        I: IntoIterator<Item = (S, ndarray::Array3<C>)>,
        S: AsRef<str>,
    {
        let dims = CUBE_DIMS.iter().map(|d| d.to_string()).collect();
        Self::new(layer_id, dims, fields.into_iter().map(|(n, a)| (n, a.into_dyn())))
    }

    /// Attach time and grid coordinates, checked against the field shape
    pub fn with_coords(mut self, coords: Coordinates) -> QaResult<Self> {
        let (t, lat, lon) = coords.shape();
        if self.shape != [t, lat, lon] {
            return Err(QaError::Dimension(format!(
                "QA layer {} has shape {:?} but coordinates have lengths {:?}",
                self.layer_id,
                self.shape,
                (t, lat, lon)
            )));
        }

        self.coords = Some(coords);
        Ok(self)
    }

    /// Names of all decoded fields, sorted
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check the layer axes are (time, latitude, longitude)
    pub fn validate(&self) -> QaResult<()> {
        validate_cube_dims(&self.dims, &format!("QA layer {}", self.layer_id))
    }
}

impl<C> QaLayerSource for QaLayerArray<C>
where
    C: PrimInt + NumCast + Send + Sync,
{
    type Code = C;

    fn layer_id(&self) -> u32 {
        self.layer_id
    }

    fn dims(&self) -> &[String] {
        &self.dims
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn field(&self, name: &str) -> QaResult<ArrayViewD<'_, C>> {
        self.fields
            .get(name)
            .map(|a| a.view())
            .ok_or_else(|| QaError::MissingField {
                layer: self.layer_id,
                field: name.to_string(),
            })
    }

    fn coords(&self) -> Option<&Coordinates> {
        self.coords.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};

    #[test]
    fn test_field_name_normalisation() {
        assert_eq!(field_name("Land/Water Flag"), "Land_Water_Flag");
        assert_eq!(field_name("VI Usefulness"), "VI_Usefulness");
        assert_eq!(field_name("MODLAND_QA"), "MODLAND_QA");
    }

    #[test]
    fn test_lookup_by_normalised_name() {
        let layer = QaLayerArray::from_cubes(
            1,
            vec![("Land/Water Flag", Array3::<u16>::from_elem((2, 2, 2), 1))],
        )
        .unwrap();

        assert_eq!(layer.field_names(), vec!["Land_Water_Flag"]);
        assert!(layer.field("Land_Water_Flag").is_ok());
        assert!(layer.validate().is_ok());

        match layer.field("Land/Water Flag") {
            Err(QaError::MissingField { layer, field }) => {
                assert_eq!(layer, 1);
                assert_eq!(field, "Land/Water Flag");
            }
            other => panic!("expected missing field, got {:?}", other.map(|v| v.shape().to_vec())),
        }
    }

    #[test]
    fn test_field_shape_mismatch() {
        let result = QaLayerArray::from_cubes(
            1,
            vec![
                ("MODLAND_QA", Array3::<u8>::zeros((3, 2, 2))),
                ("VI Usefulness", Array3::<u8>::zeros((2, 2, 2))),
            ],
        );
        assert!(matches!(result, Err(QaError::Dimension(_))));
    }

    #[test]
    fn test_coordinates_must_match_shape() {
        let layer = QaLayerArray::from_cubes(1, vec![("MODLAND_QA", Array3::<u8>::zeros((2, 1, 3)))]).unwrap();
        assert!(layer.coords().is_none());

        let start = chrono::DateTime::parse_from_rfc3339("2019-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let coords = Coordinates::new(
            vec![start, start + chrono::Duration::days(16)],
            vec![45.0],
            vec![7.0, 7.01, 7.02],
        );

        let short = Coordinates::new(coords.time.clone(), vec![45.0], vec![7.0]);
        assert!(matches!(layer.clone().with_coords(short), Err(QaError::Dimension(_))));

        let layer = layer.with_coords(coords.clone()).unwrap();
        assert_eq!(layer.coords(), Some(&coords));
    }

    #[test]
    fn test_missing_time_axis_detected() {
        let dims = vec!["latitude".to_string(), "longitude".to_string()];
        let layer = QaLayerArray::new(
            3,
            dims,
            vec![("MODLAND_QA", ArrayD::<u8>::zeros(IxDyn(&[2, 2])))],
        )
        .unwrap();
        assert!(matches!(layer.validate(), Err(QaError::Dimension(_))));
    }
}
