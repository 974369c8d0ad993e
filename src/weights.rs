//! Weight file parsing — the text tensor format an external `Evaluator`
//! backend is initialized from. No convolution math lives here (the
//! network forward pass is a separate concern); this module only parses
//! the file into tensors an `Evaluator` implementation can consume.
//!
//! Gzip transparency mirrors the common practice of shipping bulky
//! model/training files compressed; `flate2` is added for this reason
//! alone.

use std::io::Read;

use crate::error::{EngineError, EngineResult};

/// One `weights, biases, batchnorm means, batchnorm variances` block (spec
/// §6: "each block is 4 lines").
#[derive(Debug, Clone, PartialEq)]
pub struct ConvBlock {
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
    pub bn_means: Vec<f32>,
    pub bn_variances: Vec<f32>,
}

/// A fully-parsed weight file: format version, the input conv block, one
/// pair of conv blocks per residual block, the policy head conv block, the
/// value head conv block, and the two head's inner-product layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    pub version: u32,
    pub input_conv: ConvBlock,
    pub residual_blocks: Vec<(ConvBlock, ConvBlock)>,
    pub policy_conv: ConvBlock,
    pub value_conv: ConvBlock,
    pub policy_ip_weights: Vec<f32>,
    pub policy_ip_bias: Vec<f32>,
    pub value_ip_weights: Vec<f32>,
    pub value_ip_bias: Vec<f32>,
}

fn parse_floats(line: &str) -> EngineResult<Vec<f32>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|e| EngineError::InvalidWeights(format!("bad float {tok:?}: {e}")))
        })
        .collect()
}

fn next_line<'a, I: Iterator<Item = &'a str>>(lines: &mut I) -> EngineResult<&'a str> {
    lines
        .next()
        .ok_or_else(|| EngineError::InvalidWeights("unexpected end of file".into()))
}

fn parse_block<'a, I: Iterator<Item = &'a str>>(lines: &mut I) -> EngineResult<ConvBlock> {
    Ok(ConvBlock {
        weights: parse_floats(next_line(lines)?)?,
        biases: parse_floats(next_line(lines)?)?,
        bn_means: parse_floats(next_line(lines)?)?,
        bn_variances: parse_floats(next_line(lines)?)?,
    })
}

/// Parses a weight file already decompressed into `text`. Layout per spec
/// §6: version line, input conv block, 2 blocks per residual block, policy
/// conv block, value conv block, policy inner-product weights+bias, value
/// inner-product weights+bias.
pub fn parse(text: &str) -> EngineResult<Weights> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let version_line = next_line(&mut lines)?;
    let version: u32 = version_line
        .trim()
        .parse()
        .map_err(|_| EngineError::InvalidWeights(format!("bad version line {version_line:?}")))?;
    if version != 1 && version != 2 {
        return Err(EngineError::InvalidWeights(format!(
            "unsupported weight format version {version}"
        )));
    }

    let input_conv = parse_block(&mut lines)?;

    let remaining: Vec<&str> = lines.collect();
    // From here on: N pairs of residual conv blocks (8 lines each), then
    // the policy conv block (4 lines), value conv block (4 lines), then 4
    // more lines for the two inner-product layers.
    if remaining.len() < 4 + 4 + 4 {
        return Err(EngineError::InvalidWeights(
            "file too short for policy/value heads".into(),
        ));
    }
    let tail_lines = 4 + 4 + 4;
    let residual_lines = remaining.len() - tail_lines;
    if residual_lines % 8 != 0 {
        return Err(EngineError::InvalidWeights(format!(
            "computed residual-block count is not an integer ({residual_lines} lines of residual data)"
        )));
    }
    let num_residual_blocks = residual_lines / 8;

    let mut iter = remaining.into_iter();
    let mut residual_blocks = Vec::with_capacity(num_residual_blocks);
    for _ in 0..num_residual_blocks {
        let first = parse_block(&mut iter)?;
        let second = parse_block(&mut iter)?;
        residual_blocks.push((first, second));
    }

    let policy_conv = parse_block(&mut iter)?;
    let value_conv = parse_block(&mut iter)?;
    let policy_ip_weights = parse_floats(next_line(&mut iter)?)?;
    let policy_ip_bias = parse_floats(next_line(&mut iter)?)?;
    let value_ip_weights = parse_floats(next_line(&mut iter)?)?;
    let value_ip_bias = parse_floats(next_line(&mut iter)?)?;

    Ok(Weights {
        version,
        input_conv,
        residual_blocks,
        policy_conv,
        value_conv,
        policy_ip_weights,
        policy_ip_bias,
        value_ip_weights,
        value_ip_bias,
    })
}

/// Reads `path`, transparently gzip-decompressing if the file starts with
/// the gzip magic bytes, and parses it per `parse`.
pub fn load_file(path: &std::path::Path) -> EngineResult<Weights> {
    let bytes = std::fs::read(path)?;
    let text = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| EngineError::InvalidWeights(format!("gzip decode failed: {e}")))?;
        out
    } else {
        String::from_utf8(bytes)
            .map_err(|e| EngineError::InvalidWeights(format!("not valid utf-8: {e}")))?
    };
    parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_line(n: usize) -> String {
        vec!["0.1"; n].join(" ")
    }

    fn sample_text(num_residual_blocks: usize) -> String {
        let mut lines = vec!["2".to_string()];
        // input conv block: 4 lines
        for _ in 0..4 {
            lines.push(block_line(4));
        }
        for _ in 0..num_residual_blocks {
            for _ in 0..8 {
                lines.push(block_line(4));
            }
        }
        // policy conv + value conv: 4 lines each
        for _ in 0..8 {
            lines.push(block_line(4));
        }
        // policy ip weights/bias, value ip weights/bias
        for _ in 0..4 {
            lines.push(block_line(4));
        }
        lines.join("\n")
    }

    #[test]
    fn parses_well_formed_file_with_residual_blocks() {
        let text = sample_text(3);
        let weights = parse(&text).unwrap();
        assert_eq!(weights.version, 2);
        assert_eq!(weights.residual_blocks.len(), 3);
    }

    #[test]
    fn rejects_non_integer_residual_block_count() {
        let mut text = sample_text(2);
        // drop one line from the residual section to break the /8 divisibility
        let mut lines: Vec<&str> = text.lines().collect();
        lines.remove(5);
        text = lines.join("\n");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, EngineError::InvalidWeights(_)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut text = sample_text(0);
        text = text.replacen("2\n", "3\n", 1);
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, EngineError::InvalidWeights(_)));
    }
}
