// THEORY:
// The `Detection` module holds the raw input of the engine: one labelled box as
// reported by the external object detector. Like every data container at the
// bottom of the stack it is "dumb" on purpose. It carries no notion of
// identity, category or time; those are layered on by the classifier and the
// tracker.
//
// Boxes are expressed in source-image pixel space with the origin at the top
// left corner and y growing downwards, exactly as the detector reports them.
// Everything that needs normalized or viewport coordinates derives them from
// here together with the source image dimensions.

pub mod detection {
    /// An axis-aligned box in source-image pixel coordinates.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct BoundingBox {
        pub x_min: f32,
        pub y_min: f32,
        pub x_max: f32,
        pub y_max: f32,
    }

    impl BoundingBox {
        pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
            Self {
                x_min,
                y_min,
                x_max,
                y_max,
            }
        }

        /// Center of the box in pixels.
        pub fn center(&self) -> (f32, f32) {
            (
                (self.x_min + self.x_max) * 0.5,
                (self.y_min + self.y_max) * 0.5,
            )
        }

        /// Height of the box in pixels.
        pub fn height(&self) -> f32 {
            self.y_max - self.y_min
        }

        /// Center of the box normalized by the source image dimensions.
        pub fn normalized_center(&self, image_width: u32, image_height: u32) -> (f32, f32) {
            let (cx, cy) = self.center();
            (cx / image_width as f32, cy / image_height as f32)
        }
    }

    /// A single detector result: a raw label (usually "name confidence") and its box.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Detection {
        pub label: String,
        pub bbox: BoundingBox,
    }

    impl Detection {
        pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
            Self {
                label: label.into(),
                bbox,
            }
        }
    }

    /// One push from the detector.
    pub type DetectionBatch = Vec<Detection>;
}
