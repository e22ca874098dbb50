//! End-to-end scenarios exercised only through the public `compile`/
//! `Runtime` API — the black-box counterpart to the unit tests living
//! next to each module.

use tlb_runtime::{compile, DataError, DecodeInput, DecodeOptions, Record, Value};

#[test]
fn tag_selection_picks_the_matching_constructor() {
    let rt = compile("a$0 = U; b$1 = U;").unwrap();

    let b = rt.decode_bits(&[0b1000_0000], 1, true).unwrap();
    assert_eq!(b.kind(), Some("b"));

    let a = rt.decode_bits(&[0b0000_0000], 1, true).unwrap();
    assert_eq!(a.kind(), Some("a"));
}

#[test]
fn dependent_width_sizes_the_later_field_from_the_earlier_one() {
    let rt = compile("x$_ n:#5 v:(## n) = X;").unwrap();
    // n = 3 (00011), then a 3-bit v = 5 (101), byte-aligned: 00011101.
    let value = rt.decode_bits(&[0b0001_1101], 8, false).unwrap();
    let record = value.as_record().unwrap();
    assert_eq!(record.field("n").unwrap().as_int(), Some(3));
    assert_eq!(record.field("v").unwrap().as_int(), Some(5));
}

#[test]
fn constraint_gates_which_bytes_are_accepted() {
    let rt = compile("pair n:#8 m:#8 { n + m = 10 } = Pair;").unwrap();

    let ok = rt.decode_bits(&[0x03, 0x07], 16, false).unwrap();
    let record = ok.as_record().unwrap();
    assert_eq!(record.field("n").unwrap().as_int(), Some(3));
    assert_eq!(record.field("m").unwrap().as_int(), Some(7));

    let err = rt.decode_bits(&[0x03, 0x08], 16, false).unwrap_err();
    assert!(matches!(err, DataError::NoMatch { .. }));
}

#[test]
fn conditional_field_is_absent_when_predicate_is_false() {
    let rt = compile("msg has:Bool body:has?(^Cell) = Msg;").unwrap();
    let mut fields = indexmap::IndexMap::new();
    fields.insert("has".to_string(), Value::Bool(false));
    let record = Record {
        type_name: "Msg".into(),
        constructor: "msg".into(),
        fields,
        anonymous: Vec::new(),
    };
    let cell = rt.encode(&Value::Record(record)).unwrap();
    assert_eq!(cell.bit_len(), 1);
    assert_eq!(cell.references().len(), 0);

    let decoded = rt
        .decode(DecodeInput::Cell(&cell), DecodeOptions::default())
        .unwrap();
    let record = decoded.as_record().unwrap();
    assert_eq!(record.field("has").unwrap().as_bool(), Some(false));
    assert!(matches!(record.field("body").unwrap(), Value::Null));
}

#[test]
fn conditional_field_carries_the_referenced_cell_when_true() {
    let rt = compile("msg has:Bool body:has?(^Cell) = Msg;").unwrap();
    let payload = tlb_runtime::cell::Cell::leaf(vec![0xAB], 8).unwrap();

    let mut fields = indexmap::IndexMap::new();
    fields.insert("has".to_string(), Value::Bool(true));
    fields.insert("body".to_string(), Value::Cell((*payload).clone()));
    let record = Record {
        type_name: "Msg".into(),
        constructor: "msg".into(),
        fields,
        anonymous: Vec::new(),
    };
    let cell = rt.encode(&Value::Record(record)).unwrap();
    assert_eq!(cell.bit_len(), 1);
    assert_eq!(cell.references().len(), 1);

    let decoded = rt
        .decode(DecodeInput::Cell(&cell), DecodeOptions::default())
        .unwrap();
    let record = decoded.as_record().unwrap();
    match record.field("body").unwrap() {
        Value::Cell(c) => assert_eq!(c.bit_len(), 8),
        other => panic!("expected cell, got {other:?}"),
    }
}

#[test]
fn text_auto_detection_can_be_toggled() {
    let rt = compile("lbl text:(bits 24) = L;").unwrap();

    let with_text = rt.decode_bits(b"ABC", 24, false).unwrap();
    assert_eq!(
        with_text.as_record().unwrap().field("text").unwrap().as_text(),
        Some("ABC")
    );

    let raw = rt
        .decode(
            DecodeInput::Bytes(b"ABC"),
            DecodeOptions {
                by_tag: false,
                auto_text: false,
            },
        )
        .unwrap();
    match raw.as_record().unwrap().field("text").unwrap() {
        Value::Bits(bits) => assert_eq!(bits.len(), 24),
        other => panic!("expected raw bits, got {other:?}"),
    }
}

#[test]
fn hashmap_round_trips_through_encode_and_decode() {
    let rt = compile("cfg m:(HashmapE 8 ^Cell) = Cfg;").unwrap();

    let mut map = indexmap::IndexMap::new();
    map.insert(1i64, Value::Cell((*tlb_runtime::cell::Cell::leaf(vec![0xAA], 8).unwrap()).clone()));
    map.insert(2i64, Value::Cell((*tlb_runtime::cell::Cell::leaf(vec![0xBB], 8).unwrap()).clone()));

    let mut fields = indexmap::IndexMap::new();
    fields.insert("m".to_string(), Value::Dict(map));
    let record = Record {
        type_name: "Cfg".into(),
        constructor: "cfg".into(),
        fields,
        anonymous: Vec::new(),
    };

    let cell = rt.encode(&Value::Record(record)).unwrap();
    let decoded = rt
        .decode(DecodeInput::Cell(&cell), DecodeOptions::default())
        .unwrap();
    let decoded_map = match decoded.as_record().unwrap().field("m").unwrap() {
        Value::Dict(m) => m,
        other => panic!("expected dict, got {other:?}"),
    };
    assert_eq!(decoded_map.len(), 2);
    assert!(decoded_map.contains_key(&1));
    assert!(decoded_map.contains_key(&2));
}

#[test]
fn generic_type_parameter_binds_through_named_arguments() {
    let rt = compile("wrap {X:Type} inner:X = Wrap; holder w:Wrap(uint8) = Holder;").unwrap();

    let mut inner_fields = indexmap::IndexMap::new();
    inner_fields.insert("inner".to_string(), Value::Int(200));
    let wrap = Record {
        type_name: "Wrap".into(),
        constructor: "wrap".into(),
        fields: inner_fields,
        anonymous: Vec::new(),
    };

    let mut fields = indexmap::IndexMap::new();
    fields.insert("w".to_string(), Value::Record(wrap));
    let record = Record {
        type_name: "Holder".into(),
        constructor: "holder".into(),
        fields,
        anonymous: Vec::new(),
    };

    let cell = rt.encode(&Value::Record(record)).unwrap();
    assert_eq!(cell.bit_len(), 8);

    let decoded = rt
        .decode(DecodeInput::Cell(&cell), DecodeOptions::default())
        .unwrap();
    let outer = decoded.as_record().unwrap();
    let inner = outer.field("w").unwrap().as_record().unwrap();
    assert_eq!(inner.field("inner").unwrap().as_int(), Some(200));
}

#[test]
fn anonymous_field_value_round_trips() {
    let rt = compile("rec n:#8 #16 m:#8 = Rec;").unwrap();
    let bytes = [0x01u8, 0xBE, 0xEF, 0x02];
    let decoded = rt.decode_bits(&bytes, 32, false).unwrap();
    let record = decoded.as_record().unwrap();
    assert_eq!(record.field("n").unwrap().as_int(), Some(1));
    assert_eq!(record.field("m").unwrap().as_int(), Some(2));
    assert_eq!(record.anonymous.len(), 1);
    assert_eq!(record.anonymous[0].as_int(), Some(0xBEEF));

    let re_encoded = rt.encode(&decoded).unwrap();
    let re_decoded = rt
        .decode(DecodeInput::Cell(&re_encoded), DecodeOptions::default())
        .unwrap();
    let record2 = re_decoded.as_record().unwrap();
    assert_eq!(record2.anonymous[0].as_int(), Some(0xBEEF));
}
