#![no_main]

use keyjoin::{
    JoinOptions, KeyList, KeyNormalizer, KeyedTable, join_tables, read_table_bytes,
    write_csv_string,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&flags, csv)) = data.split_first() else {
        return;
    };
    let Ok(table) = read_table_bytes("fuzz.csv", csv) else {
        return;
    };

    let header = table.header();
    let key_lists = [
        KeyList::new(header[..1].to_vec()),
        KeyList::new(header.to_vec()),
    ];
    let normalizer = KeyNormalizer::new(flags & 1 != 0, flags & 2 != 0);
    let options = JoinOptions {
        cumulative: flags & 4 != 0,
        all_combinations: flags & 8 != 0,
        left_only: flags & 16 != 0,
    };

    let left = KeyedTable::build(table, &key_lists, &normalizer).expect("header validated");
    let Ok(plan) = join_tables(&left, &left, &options) else {
        return;
    };

    assert!(plan.left_positions.len() >= left.table().len());
    for row in plan.rows(left.table(), left.table()) {
        assert_eq!(row.len(), plan.header.len());
    }
    let _ = write_csv_string(&plan.header, plan.rows(left.table(), left.table()));
});
