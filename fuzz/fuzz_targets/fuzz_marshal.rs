//! Fuzz testing for the type marshal buffer.
//!
//! Feeds arbitrary bytes to the buffer's getters in an arbitrary order.
//! Malformed input must surface as an error, never as a panic, and every
//! failed read must leave the buffer exhausted.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use pdom::encoding::decode_varint;
use pdom::TypeMarshalBuffer;

#[derive(Debug, Arbitrary, Clone, Copy)]
enum Read {
    Byte,
    Short,
    FixedInt,
    Int,
    Long,
    CharArray,
    RecordPointer,
    TypeReference,
}

#[derive(Debug, Arbitrary)]
struct MarshalInput {
    reads: Vec<Read>,
    data: Vec<u8>,
}

fuzz_target!(|input: MarshalInput| {
    let _ = decode_varint(&input.data);

    let mut buf = TypeMarshalBuffer::from_bytes(input.data);
    for read in input.reads.iter().take(256) {
        let failed = match read {
            Read::Byte => buf.get_byte().is_err(),
            Read::Short => buf.get_short().is_err(),
            Read::FixedInt => buf.get_fixed_int().is_err(),
            Read::Int => buf.get_int().is_err(),
            Read::Long => buf.get_long().is_err(),
            Read::CharArray => buf.get_char_array().is_err(),
            Read::RecordPointer => buf.get_record_pointer().is_err(),
            Read::TypeReference => buf.get_type_reference().is_err(),
        };
        if failed {
            assert_eq!(buf.remaining(), 0);
            break;
        }
    }
});
