/// One object reported by a detector backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Class index in the model's label table.
    pub class_id: usize,
    pub class_name: String,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(class_id: usize, class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            confidence,
        }
    }
}
