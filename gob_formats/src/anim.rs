//! Layer metrics for animated objects: per layer, the size and hotspot
//! offset of every frame.

use anyhow::{Context, Result};

use crate::reader::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetrics {
    pub width: i16,
    pub height: i16,
    pub dx: i16,
    pub dy: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnimLayers {
    layers: Vec<Vec<FrameMetrics>>,
}

impl AnimLayers {
    pub fn new(layers: Vec<Vec<FrameMetrics>>) -> Self {
        AnimLayers { layers }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let layer_count = reader.u16_le().context("reading layer count")?;
        let mut layers = Vec::with_capacity(layer_count as usize);
        for layer in 0..layer_count {
            let frames = reader
                .u16_le()
                .with_context(|| format!("reading frame count of layer {layer}"))?;
            let mut metrics = Vec::with_capacity(frames as usize);
            for _ in 0..frames {
                metrics.push(FrameMetrics {
                    width: reader.i16_le()?,
                    height: reader.i16_le()?,
                    dx: reader.i16_le()?,
                    dy: reader.i16_le()?,
                });
            }
            layers.push(metrics);
        }
        Ok(AnimLayers { layers })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.layers.len() as u16).to_le_bytes());
        for layer in &self.layers {
            out.extend_from_slice(&(layer.len() as u16).to_le_bytes());
            for frame in layer {
                for value in [frame.width, frame.height, frame.dx, frame.dy] {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn frame_count(&self, layer: usize) -> usize {
        self.layers.get(layer).map_or(0, Vec::len)
    }

    pub fn frame(&self, layer: usize, frame: usize) -> Option<FrameMetrics> {
        self.layers.get(layer)?.get(frame).copied()
    }
}
