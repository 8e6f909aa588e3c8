use bytes::{Buf, Bytes};

use crate::error::{Error, Result};
use crate::header::*;
use crate::picture_loss_indication::PictureLossIndication;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;
use crate::transport_layer_cc::TransportLayerCc;
use crate::transport_layer_nack::TransportLayerNack;

/// One parsed element of a compound RTCP datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    PictureLossIndication(PictureLossIndication),
    TransportLayerNack(TransportLayerNack),
    TransportLayerCc(TransportLayerCc),
    Unsupported { header: Header, raw: Bytes },
}

/// Splits a compound RTCP datagram by the RFC 3550 length encoding and
/// parses each element. A malformed element fails the whole datagram.
pub fn unmarshal_compound(data: &Bytes) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();
    let mut offset = 0usize;

    while offset + HEADER_LENGTH <= data.len() {
        let mut peek = data.slice(offset..);
        let header = Header::unmarshal(&mut peek)?;
        let total = (header.length as usize + 1) * 4;
        if offset + total > data.len() {
            return Err(Error::BadLength);
        }

        let raw = data.slice(offset..offset + total);
        let mut reader = raw.clone();
        let packet = match (header.packet_type, header.count) {
            (PacketType::SenderReport, _) => Packet::SenderReport(SenderReport::unmarshal(&mut reader)?),
            (PacketType::ReceiverReport, _) => {
                Packet::ReceiverReport(ReceiverReport::unmarshal(&mut reader)?)
            }
            (PacketType::SourceDescription, _) => {
                Packet::SourceDescription(SourceDescription::unmarshal(&mut reader)?)
            }
            (PacketType::PayloadSpecificFeedback, FORMAT_PLI) => {
                Packet::PictureLossIndication(PictureLossIndication::unmarshal(&mut reader)?)
            }
            (PacketType::TransportSpecificFeedback, FORMAT_NACK) => {
                Packet::TransportLayerNack(TransportLayerNack::unmarshal(&mut reader)?)
            }
            (PacketType::TransportSpecificFeedback, FORMAT_TCC) => {
                Packet::TransportLayerCc(TransportLayerCc::unmarshal(&mut reader)?)
            }
            _ => {
                log::trace!(
                    "unsupported RTCP packet type {:?} fmt {}",
                    header.packet_type,
                    header.count
                );
                Packet::Unsupported { header, raw }
            }
        };
        packets.push(packet);
        offset += total;
    }

    if packets.is_empty() {
        return Err(Error::PacketTooShort);
    }
    Ok(packets)
}
