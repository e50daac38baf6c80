//! Dense label pipeline
//!
//! Walks a resolved label tree one level at a time. At each level every dense
//! leaf is decoded, then painted, then turned into bitmaps, with each stage
//! settled for the whole level before the next begins. A failing label never
//! stops its siblings: the failure is logged, recorded as a diagnostic and
//! the label simply ends up without a bitmap. Embedded documents are
//! processed after their parent level, and identifier remapping runs last.

use futures_util::future::{BoxFuture, join_all};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::labels::ids::remap_ids;
use crate::labels::{ImageBitmap, LabelInput, LabelTree, LeafMut, RenderStatus, TransferBuffer};
use crate::overlay::{
    BitmapCollector, ColorContext, DecodeTarget, FetchConfig, OverlayDecoder, OverlayError,
    StageFailure,
};

/// Read-only inputs shared by every stage of one request
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// Fetch configuration snapshot taken when the request started
    pub fetch: Arc<FetchConfig>,
    pub colors: ColorContext,
    /// Field path to mask location overrides
    pub sources: HashMap<String, String>,
}

/// Everything one request produced besides the mutated labels
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub bitmaps: Vec<ImageBitmap>,
    pub buffers: Vec<TransferBuffer>,
    pub diagnostics: Vec<StageFailure>,
}

impl ProcessOutcome {
    fn record_failure(&mut self, leaf: &LeafMut<'_>, error: OverlayError) {
        let stage = error.stage();
        warn!(
            "{} failed for {} at '{}': {}",
            stage.as_str(),
            leaf.class,
            leaf.path,
            error
        );
        counter!("dense_label_stage_failures_total", "stage" => stage.as_str()).increment(1);
        self.diagnostics
            .push(StageFailure::new(leaf.path, leaf.class, &error));
    }
}

pub struct DenseLabelPipeline {
    decoder: Arc<dyn OverlayDecoder>,
}

impl DenseLabelPipeline {
    pub fn new(decoder: Arc<dyn OverlayDecoder>) -> Self {
        Self { decoder }
    }

    /// Process every field container of `input` in order
    pub async fn process(&self, input: &mut LabelInput, context: &RenderContext) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();
        for tree in input.trees_mut() {
            self.process_level(tree, context, &mut outcome).await;
        }
        counter!("dense_label_bitmaps_total").increment(outcome.bitmaps.len() as u64);
        outcome
    }

    fn process_level<'a>(
        &'a self,
        tree: &'a mut LabelTree,
        context: &'a RenderContext,
        outcome: &'a mut ProcessOutcome,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.render_dense(tree, context, outcome).await;

            for document in tree.embedded_mut() {
                self.process_level(document, context, outcome).await;
            }

            for leaf in tree.leaves_mut() {
                if leaf.class.is_label() {
                    remap_ids(leaf.label, leaf.class);
                }
            }
        })
    }

    async fn render_dense(
        &self,
        tree: &mut LabelTree,
        context: &RenderContext,
        outcome: &mut ProcessOutcome,
    ) {
        let mut leaves = tree.dense_leaves_mut();
        if leaves.is_empty() {
            return;
        }

        // Decode
        for leaf in leaves.iter_mut() {
            leaf.label.advance_status(RenderStatus::Decoding);
        }
        let decoded = join_all(leaves.iter_mut().map(|leaf| {
            let target = DecodeTarget {
                path: leaf.path,
                source: context.sources.get(leaf.path).map(String::as_str),
                fetch: context.fetch.as_ref(),
            };
            self.decoder.decode(leaf.class, &mut *leaf.label, target)
        }))
        .await;
        for (leaf, result) in leaves.iter_mut().zip(decoded) {
            outcome.buffers.extend(result.buffers);
            for error in result.errors {
                outcome.record_failure(leaf, error.into());
            }
            leaf.label.advance_status(RenderStatus::Decoded);
        }

        // Paint
        for leaf in leaves.iter_mut() {
            leaf.label.advance_status(RenderStatus::Painting);
            if let Err(e) = leaf.class.painter().paint(leaf.label, leaf.path, &context.colors) {
                outcome.record_failure(leaf, e.into());
            }
            leaf.label.advance_status(RenderStatus::Painted);
        }

        // Bitmap
        let pending: Vec<_> = leaves
            .iter_mut()
            .map(|leaf| BitmapCollector::schedule(leaf.label, leaf.class))
            .collect();
        let settled = join_all(
            leaves
                .iter_mut()
                .zip(pending)
                .map(|(leaf, pending)| BitmapCollector::settle(&mut *leaf.label, pending)),
        )
        .await;
        for (leaf, results) in leaves.iter_mut().zip(settled) {
            for result in results {
                match result {
                    Ok(bitmap) => outcome.bitmaps.push(bitmap),
                    Err(e) => outcome.record_failure(leaf, e.into()),
                }
            }
            leaf.label.advance_status(RenderStatus::Ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{Label, LabelClass, Schema};
    use crate::overlay::{DecodeError, DecodeOutcome, MaskDecoder};
    use crate::test_utils::flat_resolver;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    fn pipeline() -> DenseLabelPipeline {
        let decoder = MaskDecoder::new(&Default::default()).unwrap();
        DenseLabelPipeline::new(Arc::new(decoder))
    }

    fn resolve(labels: Value, fields: &[(&str, LabelClass)]) -> LabelInput {
        LabelInput::resolve(labels, &flat_resolver(fields), "").unwrap()
    }

    async fn run(input: &mut LabelInput) -> ProcessOutcome {
        pipeline().process(input, &RenderContext::default()).await
    }

    /// Fails every label at one field path, delegating the rest
    struct FailingAt {
        path: &'static str,
        inner: MaskDecoder,
    }

    #[async_trait]
    impl OverlayDecoder for FailingAt {
        async fn decode(
            &self,
            class: LabelClass,
            label: &mut Label,
            target: DecodeTarget<'_>,
        ) -> DecodeOutcome {
            if target.path == self.path {
                return DecodeOutcome {
                    buffers: Vec::new(),
                    errors: vec![DecodeError::InvalidUrl("unreachable".to_string())],
                };
            }
            self.inner.decode(class, label, target).await
        }
    }

    #[tokio::test]
    async fn test_no_dense_fields_produces_nothing() {
        let mut input = resolve(
            json!({
                "gt": {"_id": "c1", "label": "cat"},
                "kps": {"keypoints": [{"_id": "k1", "points": [[0.1, 0.2]]}]}
            }),
            &[
                ("gt", LabelClass::Classification),
                ("kps", LabelClass::Keypoints),
            ],
        );

        let outcome = run(&mut input).await;
        assert!(outcome.bitmaps.is_empty());
        assert!(outcome.buffers.is_empty());

        let output = input.into_value().unwrap();
        assert!(output["gt"].get("renderStatus").is_none());
        assert_eq!(output["gt"]["id"], "c1");
        assert_eq!(output["kps"]["keypoints"][0]["id"], "k1");
    }

    #[tokio::test]
    async fn test_single_dense_label_becomes_ready() {
        let mut input = resolve(
            json!({"seg": {"mask": {"data": {"shape": [4, 4], "buffer": vec![1u8; 16]}}}}),
            &[("seg", LabelClass::Segmentation)],
        );

        let outcome = run(&mut input).await;
        assert_eq!(outcome.bitmaps.len(), 1);
        assert_eq!(outcome.buffers.len(), 1);
        assert!(outcome.diagnostics.is_empty());

        let output = input.into_value().unwrap();
        let mask = &output["seg"]["mask"];
        assert_eq!(output["seg"]["renderStatus"], "ready");
        assert!(mask.get("image").is_none());
        assert_eq!(mask["bitmap"]["width"], 4);
        assert_eq!(
            mask["bitmap"]["$transfer"],
            outcome.bitmaps[0].id.to_string()
        );
    }

    #[tokio::test]
    async fn test_degenerate_mask_schedules_no_bitmap() {
        let mut input = resolve(
            json!({"seg": {"mask": {"data": {"shape": [0, 4]}, "image": [0, 0, 0, 0]}}}),
            &[("seg", LabelClass::Segmentation)],
        );

        let outcome = run(&mut input).await;
        assert!(outcome.bitmaps.is_empty());

        let output = input.into_value().unwrap();
        assert!(output["seg"]["mask"].get("image").is_none());
        assert_eq!(output["seg"]["renderStatus"], "ready");
    }

    #[tokio::test]
    async fn test_embedded_document_recurses_only_resolved_fields() {
        let mut input = resolve(
            json!({
                "doc": {
                    "seg": {"mask": {"data": {"shape": [1, 1], "buffer": [1]}}},
                    "other": {"mask": {"data": {"shape": [1, 1], "buffer": [1]}}}
                }
            }),
            &[
                ("doc", LabelClass::EmbeddedDocument),
                ("doc.seg", LabelClass::Segmentation),
            ],
        );

        let outcome = run(&mut input).await;
        assert_eq!(outcome.bitmaps.len(), 1);

        let output = input.into_value().unwrap();
        assert_eq!(output["doc"]["seg"]["renderStatus"], "ready");
        assert_eq!(
            output["doc"]["other"],
            json!({"mask": {"data": {"shape": [1, 1], "buffer": [1]}}})
        );
    }

    #[tokio::test]
    async fn test_detection_list_with_null_mask() {
        let mut input = resolve(
            json!({
                "dets": {
                    "_cls": "Detections",
                    "detections": [
                        {"_id": "a", "mask": {"data": {"shape": [1, 1], "buffer": [1]}}},
                        {"_id": "b", "mask": null}
                    ]
                }
            }),
            &[("dets", LabelClass::Detections)],
        );

        let outcome = run(&mut input).await;
        assert_eq!(outcome.bitmaps.len(), 1);

        let output = input.into_value().unwrap();
        let detections = &output["dets"]["detections"];
        assert!(detections[0]["mask"].get("bitmap").is_some());
        assert!(detections[1].get("mask").is_none());
        assert_eq!(detections[0]["id"], "a");
        assert_eq!(detections[1]["id"], "b");
    }

    #[tokio::test]
    async fn test_end_to_end_bare_detection_list() {
        let schema: Schema = serde_json::from_value(json!({
            "detections": {
                "embeddedDocType": "fiftyone.core.labels.Detections",
                "fields": {"detections": {"embeddedDocType": "fiftyone.core.labels.Detection"}}
            }
        }))
        .unwrap();
        let mut input = LabelInput::resolve(
            json!({
                "detections": [
                    {"mask": {"data": {"shape": [2, 2]}, "image": vec![200u8; 16]}},
                    {"mask": null}
                ]
            }),
            &schema,
            "",
        )
        .unwrap();

        let outcome = run(&mut input).await;
        assert_eq!(outcome.bitmaps.len(), 1);

        let output = input.into_value().unwrap();
        assert_eq!(output["detections"][0]["renderStatus"], "ready");
        assert!(output["detections"][1]["mask"].is_null());
    }

    #[tokio::test]
    async fn test_decode_failure_is_isolated() {
        let decoder = FailingAt {
            path: "bad",
            inner: MaskDecoder::new(&Default::default()).unwrap(),
        };
        let pipeline = DenseLabelPipeline::new(Arc::new(decoder));
        let mut input = resolve(
            json!({
                "bad": {"mask_path": "/masks/bad.png"},
                "good": {"mask": {"data": {"shape": [1, 1], "buffer": [3]}}}
            }),
            &[
                ("bad", LabelClass::Segmentation),
                ("good", LabelClass::Segmentation),
            ],
        );

        let outcome = pipeline.process(&mut input, &RenderContext::default()).await;
        assert_eq!(outcome.bitmaps.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].path, "bad");
        assert_eq!(outcome.diagnostics[0].stage.as_str(), "decode");

        let output = input.into_value().unwrap();
        assert_eq!(output["bad"]["renderStatus"], "ready");
        assert!(output["bad"].get("mask").is_none());
        assert_eq!(output["good"]["renderStatus"], "ready");
    }

    #[tokio::test]
    async fn test_paint_failure_still_reaches_ready() {
        let mut input = resolve(
            json!({"seg": {"mask": {"data": {"shape": [2, 2], "buffer": [1]}}}}),
            &[("seg", LabelClass::Segmentation)],
        );

        let outcome = run(&mut input).await;
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].stage.as_str(), "paint");
        // The unpainted target still becomes a (transparent) bitmap
        assert_eq!(outcome.bitmaps.len(), 1);

        let output = input.into_value().unwrap();
        assert_eq!(output["seg"]["renderStatus"], "ready");
    }

    #[tokio::test]
    async fn test_bitmap_failure_is_isolated() {
        let mut input = resolve(
            json!({
                "bad": {"map": {"data": {"shape": [2, 2]}, "image": [0, 0, 0, 0]}},
                "good": {"map": {"data": {"shape": [1, 1], "buffer": [200]}}}
            }),
            &[("bad", LabelClass::Heatmap), ("good", LabelClass::Heatmap)],
        );

        let outcome = run(&mut input).await;
        assert_eq!(outcome.bitmaps.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].path, "bad");
        assert_eq!(outcome.diagnostics[0].stage.as_str(), "bitmap");

        let output = input.into_value().unwrap();
        assert_eq!(output["bad"]["renderStatus"], "ready");
        assert!(output["bad"]["map"].get("bitmap").is_none());
        assert!(output["bad"]["map"].get("image").is_none());
        assert_eq!(output["good"]["renderStatus"], "ready");
        assert!(output["good"]["map"].get("bitmap").is_some());
    }

    #[tokio::test]
    async fn test_malformed_shapes_do_not_fail_siblings() {
        let mut input = resolve(
            json!({
                "flat": {"mask": {"data": {"shape": [2, 2, 0], "buffer": []}}},
                "huge": {"mask": {"data": {"shape": [4294967295u32, 4294967295u32], "buffer": [1]}}},
                "wide": {"mask": {"data": {"shape": [65536, 65536], "buffer": [1]}}},
                "ok": {"mask": {"data": {"shape": [2, 2], "buffer": [0, 1, 1, 0]}}}
            }),
            &[
                ("flat", LabelClass::Segmentation),
                ("huge", LabelClass::Segmentation),
                ("wide", LabelClass::Detection),
                ("ok", LabelClass::Segmentation),
            ],
        );

        let outcome = run(&mut input).await;
        assert_eq!(outcome.bitmaps.len(), 1);
        assert_eq!(outcome.buffers.len(), 1);
        let failed: Vec<&str> = outcome.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(failed, vec!["flat", "huge", "wide"]);
        assert!(outcome.diagnostics.iter().all(|d| d.stage.as_str() == "decode"));

        let output = input.into_value().unwrap();
        for field in ["flat", "huge", "wide", "ok"] {
            assert_eq!(output[field]["renderStatus"], "ready", "{}", field);
        }
        assert!(output["flat"]["mask"].get("bitmap").is_none());
        assert!(output["ok"]["mask"].get("bitmap").is_some());
    }

    #[tokio::test]
    async fn test_instance_coloring_uses_stored_id() {
        use crate::overlay::color::{ColorBy, parse_hex};
        use crate::overlay::{Coloring, resolve_color};

        let mut input = resolve(
            json!({"det": {"_id": "aaaa", "mask": {"data": {"shape": [1, 1], "buffer": [1]}}}}),
            &[("det", LabelClass::Detection)],
        );
        let coloring = Coloring {
            by: ColorBy::Instance,
            ..Default::default()
        };
        let expected = parse_hex(&resolve_color(&coloring.pool, coloring.seed, "aaaa")).unwrap();
        let context = RenderContext {
            colors: ColorContext {
                coloring,
                ..Default::default()
            },
            ..Default::default()
        };

        let outcome = pipeline().process(&mut input, &context).await;
        assert_eq!(outcome.bitmaps[0].pixels.as_ref(), &expected[..]);

        let output = input.into_value().unwrap();
        assert_eq!(output["det"]["id"], "aaaa");
    }

    #[tokio::test]
    async fn test_ready_input_stays_ready() {
        let mut input = resolve(
            json!({"seg": {"renderStatus": "ready", "mask": {"data": {"shape": [1, 1], "buffer": [1]}}}}),
            &[("seg", LabelClass::Segmentation)],
        );

        run(&mut input).await;
        let output = input.into_value().unwrap();
        assert_eq!(output["seg"]["renderStatus"], "ready");
    }

    #[tokio::test]
    async fn test_sources_override_mask_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.png");
        std::fs::write(&path, crate::test_utils::encode_png_gray(2, 1, &[0, 9])).unwrap();

        let mut input = resolve(
            json!({"seg": {"mask_path": "/elsewhere/seg.png"}}),
            &[("seg", LabelClass::Segmentation)],
        );
        let context = RenderContext {
            sources: HashMap::from([("seg".to_string(), path.to_string_lossy().into_owned())]),
            ..Default::default()
        };

        let outcome = pipeline().process(&mut input, &context).await;
        assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
        assert_eq!(outcome.bitmaps.len(), 1);
        assert_eq!(outcome.buffers.len(), 1);
    }
}
