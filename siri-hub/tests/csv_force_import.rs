//! Force import replaces the previous rows for the same model name.

use siri_hub::model::csv_loader::{CsvLoader, ImportRow, MemoryModelWriter, RecordType};

const FIRST_IMPORT: &str = "\
operator,op-1,m,First,{}
line,li-1,m,Ligne 1,{},{},,false
";

const SECOND_IMPORT: &str = "\
operator,op-2,m,Second,{}
";

#[test]
fn force_import_leaves_exactly_the_second_file() {
    let writer = MemoryModelWriter::new();

    CsvLoader::new("referential", true)
        .load_reader(FIRST_IMPORT.as_bytes(), &writer)
        .expect("first import should succeed");
    assert_eq!(writer.rows(RecordType::Operator).len(), 1);
    assert_eq!(writer.rows(RecordType::Line).len(), 1);

    CsvLoader::new("referential", true)
        .load_reader(SECOND_IMPORT.as_bytes(), &writer)
        .expect("second import should succeed");

    let operators = writer.rows(RecordType::Operator);
    assert_eq!(operators.len(), 1);
    let ImportRow::Operator(operator) = &operators[0] else {
        panic!("expected an operator row");
    };
    assert_eq!(operator.id, "op-2");
    assert_eq!(operator.name, "Second");

    // The second file carried no line rows, so no line purge happened.
    assert_eq!(writer.rows(RecordType::Line).len(), 1);
}

#[test]
fn import_without_force_accumulates() {
    let writer = MemoryModelWriter::new();

    CsvLoader::new("referential", false)
        .load_reader(FIRST_IMPORT.as_bytes(), &writer)
        .unwrap();
    CsvLoader::new("referential", false)
        .load_reader(SECOND_IMPORT.as_bytes(), &writer)
        .unwrap();

    assert_eq!(writer.rows(RecordType::Operator).len(), 2);
}
