//! Page sensing
//!
//! Captures a [`PageSnapshot`] of the active target: enable the inspection
//! domains, read the layout viewport, fetch the flattened document, probe
//! element geometry top-down from `<html>`, then prune and number the
//! retained elements.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info, trace};

use crate::browser::snapshot::{
    DomIndex, Generations, PageSnapshot, RawNode, Rect, SnapshotBuilder, SnapshotLimits, Viewport,
};
use crate::browser::target::{Attachment, TargetTracker};
use crate::core::config::BrowserConfig;
use crate::core::SensorError;

const DOMAINS: [&str; 3] = ["DOM", "Page", "Runtime"];

/// Produces snapshots of the tracked page target
pub struct PageSensor {
    tracker: Arc<TargetTracker>,
    config: BrowserConfig,
    generations: Generations,
}

impl PageSensor {
    pub fn new(tracker: Arc<TargetTracker>, config: BrowserConfig) -> Self {
        Self {
            tracker,
            config,
            generations: Generations::default(),
        }
    }

    /// Counter shared with the executor for stale-handle detection
    pub fn generations(&self) -> Generations {
        self.generations.clone()
    }

    pub fn tracker(&self) -> &Arc<TargetTracker> {
        &self.tracker
    }

    /// Resolve the target to sense, failing with `NoTarget` if none exists
    pub async fn ensure_target(&self) -> Result<String, SensorError> {
        self.tracker
            .resolve_active()
            .await
            .map_err(|e| SensorError::AttachFailed(e.to_string()))?
            .ok_or(SensorError::NoTarget)
    }

    /// Capture the visible page.
    ///
    /// The debugging session is released before returning, whether or not
    /// the capture succeeded.
    pub async fn capture(&self) -> Result<PageSnapshot, SensorError> {
        let target_id = self.ensure_target().await?;
        let session = self
            .tracker
            .attach(&target_id)
            .await
            .map_err(|e| SensorError::AttachFailed(e.to_string()))?;

        let outcome = self.capture_with(&session).await;
        session.detach().await;

        if let Ok(snapshot) = &outcome {
            info!(
                "Captured snapshot #{} of {} ({} elements)",
                snapshot.generation,
                snapshot.url,
                snapshot.handles.len()
            );
        }
        outcome
    }

    async fn capture_with(&self, session: &Attachment) -> Result<PageSnapshot, SensorError> {
        for domain in DOMAINS {
            session
                .send(&format!("{}.enable", domain), json!({}))
                .await
                .map_err(|e| SensorError::DomainEnableFailed {
                    domain: domain.to_string(),
                    message: e.to_string(),
                })?;
        }

        let metrics = session.send("Page.getLayoutMetrics", json!({})).await?;
        let viewport = parse_viewport(&metrics);

        let document = session
            .send("DOM.getFlattenedDocument", json!({ "depth": -1, "pierce": false }))
            .await?;
        let nodes: Vec<RawNode> = serde_json::from_value(document["nodes"].clone())
            .map_err(|e| SensorError::Protocol(format!("bad flattened document: {}", e)))?;
        let index = DomIndex::new(nodes);

        let bounds = self.probe_visible(session, &index, viewport.rect()).await?;

        let info = self
            .tracker
            .info(session.target_id())
            .await
            .map_err(SensorError::from)?;

        let limits = SnapshotLimits {
            text_limit: self.config.text_limit,
            attribute_limit: self.config.attribute_limit,
            max_depth: self.config.max_depth,
        };
        let (dom_tree, handles) = SnapshotBuilder::new(&index, &bounds, viewport.rect(), limits)
            .build()
            .ok_or_else(|| SensorError::Protocol("document has no root element".to_string()))?;

        Ok(PageSnapshot {
            generation: self.generations.advance(),
            url: info.url,
            title: info.title,
            timestamp: Utc::now(),
            viewport,
            dom_tree,
            handles,
        })
    }

    /// Breadth-first geometry probe. Only children of visible elements are
    /// explored, so hidden subtrees cost a single round-trip.
    async fn probe_visible(
        &self,
        session: &Attachment,
        index: &DomIndex,
        viewport: Rect,
    ) -> Result<HashMap<i64, Rect>, SensorError> {
        let mut bounds = HashMap::new();
        let Some(root) = index.root_element() else {
            return Ok(bounds);
        };

        let mut queue = VecDeque::from([(root.node_id, 0usize)]);
        while let Some((node_id, depth)) = queue.pop_front() {
            if depth >= self.config.max_depth {
                continue;
            }

            let children: Vec<(i64, i64)> = index
                .element_children(node_id)
                .map(|n| (n.node_id, n.backend_node_id))
                .collect();

            let probes = children
                .iter()
                .map(|&(_, backend_id)| box_of(session, backend_id));
            for (&(child_id, _), rect) in children.iter().zip(join_all(probes).await) {
                if bounds.len() >= self.config.max_nodes {
                    debug!("Snapshot node budget of {} reached", self.config.max_nodes);
                    return Ok(bounds);
                }
                if let Some(rect) = rect.filter(|r| r.intersects(&viewport)) {
                    bounds.insert(child_id, rect);
                    queue.push_back((child_id, depth + 1));
                }
            }
        }
        Ok(bounds)
    }
}

/// Border box of a node; `None` when it has no layout
async fn box_of(session: &Attachment, backend_node_id: i64) -> Option<Rect> {
    match session
        .send("DOM.getBoxModel", json!({ "backendNodeId": backend_node_id }))
        .await
    {
        Ok(result) => quad_rect(&result["model"]["border"]),
        Err(e) => {
            trace!("No box for backend node {}: {}", backend_node_id, e);
            None
        }
    }
}

pub(crate) fn quad_rect(quad: &Value) -> Option<Rect> {
    let points: Vec<f64> = quad.as_array()?.iter().filter_map(Value::as_f64).collect();
    Rect::from_quad(&points)
}

/// Viewport from `Page.getLayoutMetrics`, preferring the CSS-pixel fields
fn parse_viewport(metrics: &Value) -> Viewport {
    let layout = if metrics["cssLayoutViewport"].is_object() {
        &metrics["cssLayoutViewport"]
    } else {
        &metrics["layoutViewport"]
    };
    let content = if metrics["cssContentSize"].is_object() {
        &metrics["cssContentSize"]
    } else {
        &metrics["contentSize"]
    };

    let num = |v: &Value| v.as_f64().unwrap_or(0.0);
    let width = num(&layout["clientWidth"]);
    let height = num(&layout["clientHeight"]);

    Viewport {
        width,
        height,
        scroll_x: num(&layout["pageX"]),
        scroll_y: num(&layout["pageY"]),
        scroll_max_x: (num(&content["width"]) - width).max(0.0),
        scroll_max_y: (num(&content["height"]) - height).max(0.0),
    }
}
