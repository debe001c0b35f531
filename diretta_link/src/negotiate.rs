//! Sink format negotiation.
//!
//! Given the input format and the capabilities the sink advertised at
//! connect time, pick the wire format to latch and the transform set the
//! ring applies on push. Probing order is fixed; the first accepted
//! candidate wins.

use crate::{
    error::{LinkError, Result},
    format::{AudioFormat, BitOrder, Endianness, TransformSet, WireFormat, WireKind},
};

/// Wire-format support advertised by a sink.
///
/// DSD bit order and endianness are advertised independently; a sink that
/// sets `dsd` with no order/endianness flags is treated as LSB-first
/// big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCaps {
    pub pcm_s32: bool,
    pub pcm_s24: bool,
    pub pcm_s16: bool,
    pub dsd: bool,
    pub dsd_lsb: bool,
    pub dsd_msb: bool,
    pub dsd_big: bool,
    pub dsd_little: bool,
    pub max_pcm_rate: u32,
    pub max_dsd_rate: u32,
    pub max_channels: u8,
}

impl Default for SinkCaps {
    fn default() -> Self {
        Self {
            pcm_s32: true,
            pcm_s24: true,
            pcm_s16: true,
            dsd: true,
            dsd_lsb: true,
            dsd_msb: true,
            dsd_big: true,
            dsd_little: true,
            max_pcm_rate: 1_536_000,
            // DSD1024
            max_dsd_rate: 45_158_400,
            max_channels: 8,
        }
    }
}

impl SinkCaps {
    /// Whether the sink accepts this exact wire format.
    pub fn accepts(&self, wire: &WireFormat) -> bool {
        if wire.channels == 0 || wire.channels > self.max_channels {
            return false;
        }
        match wire.kind {
            WireKind::Pcm { bits } => {
                if wire.sample_rate > self.max_pcm_rate {
                    return false;
                }
                match bits {
                    32 => self.pcm_s32,
                    24 => self.pcm_s24,
                    16 => self.pcm_s16,
                    _ => false,
                }
            }
            WireKind::Dsd { bit_order, endianness } => {
                if !self.dsd || wire.sample_rate > self.max_dsd_rate {
                    return false;
                }
                let order_ok = match bit_order {
                    BitOrder::Lsb => self.dsd_lsb,
                    BitOrder::Msb => self.dsd_msb,
                };
                let endian_ok = match endianness {
                    Endianness::Big => self.dsd_big,
                    Endianness::Little => self.dsd_little,
                };
                order_ok && endian_ok
            }
        }
    }

    fn dsd_rate_ok(&self, wire_rate: u32, channels: u8) -> bool {
        self.dsd && wire_rate <= self.max_dsd_rate && channels > 0 && channels <= self.max_channels
    }
}

/// Selects a wire format and derives the transform set for `format`.
///
/// PCM candidates are probed S32 → S24 → S16, skipping any the input
/// cannot reach bit-perfectly with the available transforms. DSD
/// candidates are probed (LSB, BIG) → (MSB, BIG) → (LSB, LITTLE) →
/// (MSB, LITTLE); a sink advertising bare DSD support is latched as
/// (LSB, BIG).
pub fn negotiate(format: &AudioFormat, caps: &SinkCaps) -> Result<(WireFormat, TransformSet)> {
    if format.is_dsd() {
        negotiate_dsd(format, caps)
    } else {
        negotiate_pcm(format, caps)
    }
}

fn negotiate_pcm(format: &AudioFormat, caps: &SinkCaps) -> Result<(WireFormat, TransformSet)> {
    // Candidate wire widths per input depth, in probe order, paired with
    // the transform that reaches them losslessly.
    let candidates: &[(u8, TransformSet)] = match format.bit_depth {
        16 => &[
            (32, TransformSet { widen16_to_32: true, ..TransformSet::default() }),
            (16, TransformSet::default()),
        ],
        // 24-bit input stays in its 32-bit container on an S32 wire.
        24 => &[
            (32, TransformSet::default()),
            (24, TransformSet { pack24_in_32: true, ..TransformSet::default() }),
        ],
        32 => &[(32, TransformSet::default())],
        _ => return Err(LinkError::FormatUnsupported),
    };

    for &(bits, transforms) in candidates {
        let wire = WireFormat {
            kind: WireKind::Pcm { bits },
            sample_rate: format.sample_rate_hz,
            channels: format.channels,
        };
        if caps.accepts(&wire) {
            return Ok((wire, transforms));
        }
    }
    Err(LinkError::FormatUnsupported)
}

fn negotiate_dsd(format: &AudioFormat, caps: &SinkCaps) -> Result<(WireFormat, TransformSet)> {
    let Some(source_order) = format.source_bit_order() else {
        return Err(LinkError::FormatUnsupported);
    };

    const CANDIDATES: [(BitOrder, Endianness); 4] = [
        (BitOrder::Lsb, Endianness::Big),
        (BitOrder::Msb, Endianness::Big),
        (BitOrder::Lsb, Endianness::Little),
        (BitOrder::Msb, Endianness::Little),
    ];

    let latch = |bit_order: BitOrder, endianness: Endianness| {
        let wire = WireFormat {
            kind: WireKind::Dsd { bit_order, endianness },
            sample_rate: format.sample_rate_hz,
            channels: format.channels,
        };
        let transforms = TransformSet {
            dsd_bit_reverse: source_order != bit_order,
            dsd_byte_swap: endianness == Endianness::Little,
            dsd_planar_interleave: true,
            ..TransformSet::default()
        };
        (wire, transforms)
    };

    for (bit_order, endianness) in CANDIDATES {
        let (wire, transforms) = latch(bit_order, endianness);
        if caps.accepts(&wire) {
            return Ok((wire, transforms));
        }
    }

    // Bare DSD advertisement: infer LSB-first big-endian.
    if caps.dsd_rate_ok(format.sample_rate_hz, format.channels) {
        return Ok(latch(BitOrder::Lsb, Endianness::Big));
    }
    Err(LinkError::FormatUnsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DsdSubformat;

    fn pcm_caps(s32: bool, s24: bool, s16: bool) -> SinkCaps {
        SinkCaps { pcm_s32: s32, pcm_s24: s24, pcm_s16: s16, ..SinkCaps::default() }
    }

    #[test]
    fn test_pcm_probe_order_prefers_s32() {
        let format = AudioFormat::pcm(44_100, 16, 2);
        let (wire, transforms) = negotiate(&format, &SinkCaps::default()).unwrap();
        assert_eq!(wire.kind, WireKind::Pcm { bits: 32 });
        assert!(transforms.widen16_to_32);
        assert!(!transforms.pack24_in_32);
    }

    #[test]
    fn test_pcm_16_falls_back_to_s16_passthrough() {
        let format = AudioFormat::pcm(44_100, 16, 2);
        let (wire, transforms) = negotiate(&format, &pcm_caps(false, true, true)).unwrap();
        assert_eq!(wire.kind, WireKind::Pcm { bits: 16 });
        assert_eq!(transforms, TransformSet::default());
    }

    #[test]
    fn test_pcm_24_packs_on_s24_wire() {
        let format = AudioFormat::pcm(96_000, 24, 2);
        let (wire, transforms) = negotiate(&format, &pcm_caps(false, true, true)).unwrap();
        assert_eq!(wire.kind, WireKind::Pcm { bits: 24 });
        assert!(transforms.pack24_in_32);

        // With S32 available the container passes through unchanged.
        let (wire, transforms) = negotiate(&format, &SinkCaps::default()).unwrap();
        assert_eq!(wire.kind, WireKind::Pcm { bits: 32 });
        assert_eq!(transforms, TransformSet::default());
    }

    #[test]
    fn test_pcm_32_needs_s32() {
        let format = AudioFormat::pcm(192_000, 32, 2);
        assert!(negotiate(&format, &SinkCaps::default()).is_ok());
        // Truncating to a narrower wire is not offered.
        assert_eq!(negotiate(&format, &pcm_caps(false, true, true)), Err(LinkError::FormatUnsupported));
    }

    #[test]
    fn test_pcm_rate_bound() {
        let format = AudioFormat::pcm(1_536_000, 32, 2);
        let caps = SinkCaps { max_pcm_rate: 768_000, ..SinkCaps::default() };
        assert_eq!(negotiate(&format, &caps), Err(LinkError::FormatUnsupported));
    }

    #[test]
    fn test_dsd_candidate_order() {
        let format = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dsf);
        let (wire, transforms) = negotiate(&format, &SinkCaps::default()).unwrap();
        assert_eq!(wire.kind, WireKind::Dsd { bit_order: BitOrder::Lsb, endianness: Endianness::Big });
        // DSF is already LSB-first; big-endian wire needs no swap.
        assert!(!transforms.dsd_bit_reverse);
        assert!(!transforms.dsd_byte_swap);
        assert!(transforms.dsd_planar_interleave);
    }

    #[test]
    fn test_dsd_bit_reverse_follows_advertisement() {
        let caps = SinkCaps { dsd_lsb: false, ..SinkCaps::default() };
        let dsf = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dsf);
        let (wire, transforms) = negotiate(&dsf, &caps).unwrap();
        assert_eq!(wire.kind, WireKind::Dsd { bit_order: BitOrder::Msb, endianness: Endianness::Big });
        assert!(transforms.dsd_bit_reverse);

        // A DFF source on the same sink is already MSB-first.
        let dff = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dff);
        let (_, transforms) = negotiate(&dff, &caps).unwrap();
        assert!(!transforms.dsd_bit_reverse);
    }

    #[test]
    fn test_dsd_little_endian_wire_swaps() {
        let caps = SinkCaps { dsd_big: false, ..SinkCaps::default() };
        let format = AudioFormat::dsd(5_644_800, 2, DsdSubformat::Dsf);
        let (wire, transforms) = negotiate(&format, &caps).unwrap();
        assert_eq!(wire.kind, WireKind::Dsd { bit_order: BitOrder::Lsb, endianness: Endianness::Little });
        assert!(transforms.dsd_byte_swap);
    }

    #[test]
    fn test_bare_dsd_advertisement_infers_lsb_big() {
        let caps = SinkCaps {
            dsd_lsb: false,
            dsd_msb: false,
            dsd_big: false,
            dsd_little: false,
            ..SinkCaps::default()
        };
        let format = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dff);
        let (wire, transforms) = negotiate(&format, &caps).unwrap();
        assert_eq!(wire.kind, WireKind::Dsd { bit_order: BitOrder::Lsb, endianness: Endianness::Big });
        // DFF source is MSB-first, inferred wire is LSB-first.
        assert!(transforms.dsd_bit_reverse);
    }

    #[test]
    fn test_no_dsd_support() {
        let caps = SinkCaps { dsd: false, ..SinkCaps::default() };
        let format = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dsf);
        assert_eq!(negotiate(&format, &caps), Err(LinkError::FormatUnsupported));
    }

    #[test]
    fn test_invalid_pcm_depth() {
        let format = AudioFormat::pcm(44_100, 20, 2);
        assert_eq!(negotiate(&format, &SinkCaps::default()), Err(LinkError::FormatUnsupported));
    }
}
