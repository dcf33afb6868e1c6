use vsphere_manager::Record;

pub fn format_field(key: &str, value: &str) -> String {
    format!("{key:>20}: {value}")
}

/// One `key: value` line per field, keys right-aligned.
pub fn print_record(record: &Record) {
    for (key, value) in record.iter() {
        println!("{}", format_field(key, value));
    }
}

pub fn print_separator() {
    println!("{}", "-".repeat(60));
}
