#![allow(dead_code)]

use cfdp_extract::carrier::{FrameRecord, PacketRecord, TmFrameHeader};

pub const VCID: u16 = 1;
pub const APID: u16 = 1280;

/// File data PDU with 2 byte entity ids and 1 byte tsn, i.e., a 9 byte header.
pub fn pdu(tsn: u8, data: &[u8]) -> Vec<u8> {
    let mut dat = vec![0x30];
    dat.extend(u16::try_from(data.len()).unwrap().to_be_bytes());
    dat.push(0x10);
    dat.extend([0x00, 0x17, tsn, 0x00, 0x01]);
    dat.extend(data);
    dat
}

/// Frame record whose data area is `area`.
pub fn frame(seq: u32, dp: u16, area: &[u8]) -> FrameRecord {
    FrameRecord::builder()
        .scid(76)
        .vcid(VCID)
        .sequence(seq)
        .header_len(TmFrameHeader::LEN)
        .data_len(area.len())
        .data_pointer(dp)
        .continuation(dp == TmFrameHeader::FHP_CONTINUATION)
        .idle(dp == TmFrameHeader::FHP_IDLE)
        .data([&[0u8; TmFrameHeader::LEN][..], area].concat())
        .build()
}

pub fn continuation(seq: u32, area: &[u8]) -> FrameRecord {
    frame(seq, TmFrameHeader::FHP_CONTINUATION, area)
}

/// Raw TM version 1 frame bytes with an OCF and, optionally, a FECF.
pub fn tm_frame(vcid: u16, vc_count: u8, fhp: u16, area: &[u8], fecf: bool) -> Vec<u8> {
    // scid 76, ocf flag set
    let x: u16 = (76 << 4) | ((vcid & 0x7) << 1) | 1;
    let mut dat = Vec::new();
    dat.extend(x.to_be_bytes());
    dat.extend([0x00, vc_count]);
    dat.extend((fhp & 0x7ff).to_be_bytes());
    dat.extend(area);
    dat.extend([0u8; TmFrameHeader::OCF_LEN]);
    if fecf {
        let crc = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740).checksum(&dat);
        dat.extend(crc.to_be_bytes());
    }
    dat
}

/// Space packet record without a secondary header.
pub fn packet(apid: u16, seq: u16, user_data: &[u8]) -> PacketRecord {
    let mut dat = Vec::new();
    dat.extend((apid & 0x7ff).to_be_bytes());
    dat.extend((0xc000 | (seq & 0x3fff)).to_be_bytes());
    dat.extend(u16::try_from(user_data.len() - 1).unwrap().to_be_bytes());
    dat.extend(user_data);
    let mut pkt = PacketRecord::decode(dat).unwrap();
    pkt.vcid = VCID;
    pkt.scid = 76;
    pkt
}
