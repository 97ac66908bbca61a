//! MessagePack opcode constants (2017 spec revision) and the wire-family
//! classifier used in error messages.

pub(crate) const NIL: u8 = 0xc0;
pub(crate) const NEVER_USED: u8 = 0xc1;
pub(crate) const FALSE: u8 = 0xc2;
pub(crate) const TRUE: u8 = 0xc3;
pub(crate) const BIN8: u8 = 0xc4;
pub(crate) const BIN16: u8 = 0xc5;
pub(crate) const BIN32: u8 = 0xc6;
pub(crate) const EXT8: u8 = 0xc7;
pub(crate) const EXT16: u8 = 0xc8;
pub(crate) const EXT32: u8 = 0xc9;
pub(crate) const FLOAT32: u8 = 0xca;
pub(crate) const FLOAT64: u8 = 0xcb;
pub(crate) const UINT8: u8 = 0xcc;
pub(crate) const UINT16: u8 = 0xcd;
pub(crate) const UINT32: u8 = 0xce;
pub(crate) const UINT64: u8 = 0xcf;
pub(crate) const INT8: u8 = 0xd0;
pub(crate) const INT16: u8 = 0xd1;
pub(crate) const INT32: u8 = 0xd2;
pub(crate) const INT64: u8 = 0xd3;
pub(crate) const FIXEXT1: u8 = 0xd4;
pub(crate) const FIXEXT2: u8 = 0xd5;
pub(crate) const FIXEXT4: u8 = 0xd6;
pub(crate) const FIXEXT8: u8 = 0xd7;
pub(crate) const FIXEXT16: u8 = 0xd8;
pub(crate) const STR8: u8 = 0xd9;
pub(crate) const STR16: u8 = 0xda;
pub(crate) const STR32: u8 = 0xdb;
pub(crate) const ARRAY16: u8 = 0xdc;
pub(crate) const ARRAY32: u8 = 0xdd;
pub(crate) const MAP16: u8 = 0xde;
pub(crate) const MAP32: u8 = 0xdf;

/// Extension type code of the Timestamp extension.
pub(crate) const TIMESTAMP_EXT: i8 = -1;

/// Wire family of an opcode, as named in validation errors.
pub(crate) fn family(op: u8) -> &'static str {
    match op {
        0x00..=0x7f | 0xe0..=0xff => "int",
        UINT8..=UINT64 | INT8..=INT64 => "int",
        NIL => "nil",
        FALSE | TRUE => "bool",
        FLOAT32 | FLOAT64 => "float",
        0xa0..=0xbf | STR8..=STR32 => "str",
        BIN8..=BIN32 => "bin",
        0x90..=0x9f | ARRAY16 | ARRAY32 => "array",
        0x80..=0x8f | MAP16 | MAP32 => "map",
        EXT8..=EXT32 | FIXEXT1..=FIXEXT16 => "ext",
        NEVER_USED => "invalid",
    }
}

#[test]
fn test_family_names() {
    assert_eq!(family(0x7f), "int");
    assert_eq!(family(0xe0), "int");
    assert_eq!(family(0xcb), "float");
    assert_eq!(family(0xa1), "str");
    assert_eq!(family(0x92), "array");
    assert_eq!(family(0xde), "map");
    assert_eq!(family(0xd6), "ext");
    assert_eq!(family(0xc1), "invalid");
}
