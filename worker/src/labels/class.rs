//! Closed set of label classes the worker understands

use std::fmt;

use crate::overlay::paint::{
    DetectionPainter, DetectionsPainter, HeatmapPainter, NoopPainter, Painter,
    SegmentationPainter,
};

/// Attribute of a dense label holding its overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayField {
    Mask,
    Map,
}

impl OverlayField {
    pub fn name(self) -> &'static str {
        match self {
            OverlayField::Mask => "mask",
            OverlayField::Map => "map",
        }
    }

    /// Attribute naming the encoded overlay on disk
    pub fn path_attribute(self) -> &'static str {
        match self {
            OverlayField::Mask => "mask_path",
            OverlayField::Map => "map_path",
        }
    }
}

/// Label class resolved from the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelClass {
    Classification,
    Classifications,
    Detection,
    Detections,
    Polyline,
    Polylines,
    Keypoint,
    Keypoints,
    Segmentation,
    Heatmap,
    GeoLocation,
    GeoLocations,
    TemporalDetection,
    TemporalDetections,
    Regression,
    EmbeddedDocument,
    DynamicEmbeddedDocument,
}

impl LabelClass {
    const ALL: [LabelClass; 17] = [
        LabelClass::Classification,
        LabelClass::Classifications,
        LabelClass::Detection,
        LabelClass::Detections,
        LabelClass::Polyline,
        LabelClass::Polylines,
        LabelClass::Keypoint,
        LabelClass::Keypoints,
        LabelClass::Segmentation,
        LabelClass::Heatmap,
        LabelClass::GeoLocation,
        LabelClass::GeoLocations,
        LabelClass::TemporalDetection,
        LabelClass::TemporalDetections,
        LabelClass::Regression,
        LabelClass::EmbeddedDocument,
        LabelClass::DynamicEmbeddedDocument,
    ];

    /// Parse a class name, accepting fully qualified document types such as
    /// `fiftyone.core.labels.Detections`
    pub fn from_name(name: &str) -> Option<Self> {
        let short = name.rsplit('.').next().unwrap_or(name);
        Self::ALL.into_iter().find(|class| class.name() == short)
    }

    pub fn name(self) -> &'static str {
        match self {
            LabelClass::Classification => "Classification",
            LabelClass::Classifications => "Classifications",
            LabelClass::Detection => "Detection",
            LabelClass::Detections => "Detections",
            LabelClass::Polyline => "Polyline",
            LabelClass::Polylines => "Polylines",
            LabelClass::Keypoint => "Keypoint",
            LabelClass::Keypoints => "Keypoints",
            LabelClass::Segmentation => "Segmentation",
            LabelClass::Heatmap => "Heatmap",
            LabelClass::GeoLocation => "GeoLocation",
            LabelClass::GeoLocations => "GeoLocations",
            LabelClass::TemporalDetection => "TemporalDetection",
            LabelClass::TemporalDetections => "TemporalDetections",
            LabelClass::Regression => "Regression",
            LabelClass::EmbeddedDocument => "EmbeddedDocument",
            LabelClass::DynamicEmbeddedDocument => "DynamicEmbeddedDocument",
        }
    }

    /// Carries a pixel overlay that goes through decode, paint and bitmap
    pub fn is_dense(self) -> bool {
        matches!(
            self,
            LabelClass::Detection
                | LabelClass::Detections
                | LabelClass::Segmentation
                | LabelClass::Heatmap
        )
    }

    /// Container of further named sub-labels
    pub fn is_embedded_document(self) -> bool {
        matches!(
            self,
            LabelClass::EmbeddedDocument | LabelClass::DynamicEmbeddedDocument
        )
    }

    /// Recognized label type, subject to identifier remapping
    pub fn is_label(self) -> bool {
        !self.is_embedded_document()
    }

    /// Attribute holding the list of sub-labels for collection classes
    pub fn list_attribute(self) -> Option<&'static str> {
        match self {
            LabelClass::Classifications => Some("classifications"),
            LabelClass::Detections | LabelClass::TemporalDetections => Some("detections"),
            LabelClass::Keypoints => Some("keypoints"),
            LabelClass::Polylines => Some("polylines"),
            _ => None,
        }
    }

    /// Class of each element of a collection class
    pub fn child_class(self) -> Option<LabelClass> {
        match self {
            LabelClass::Classifications => Some(LabelClass::Classification),
            LabelClass::Detections => Some(LabelClass::Detection),
            LabelClass::TemporalDetections => Some(LabelClass::TemporalDetection),
            LabelClass::Keypoints => Some(LabelClass::Keypoint),
            LabelClass::Polylines => Some(LabelClass::Polyline),
            _ => None,
        }
    }

    pub fn overlay_field(self) -> Option<OverlayField> {
        match self {
            LabelClass::Detection | LabelClass::Segmentation => Some(OverlayField::Mask),
            LabelClass::Heatmap => Some(OverlayField::Map),
            _ => None,
        }
    }

    /// Painter for this class; classes without overlays get a no-op
    pub fn painter(self) -> &'static dyn Painter {
        match self {
            LabelClass::Detection => &DetectionPainter,
            LabelClass::Detections => &DetectionsPainter,
            LabelClass::Segmentation => &SegmentationPainter,
            LabelClass::Heatmap => &HeatmapPainter,
            _ => &NoopPainter,
        }
    }
}

impl fmt::Display for LabelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
