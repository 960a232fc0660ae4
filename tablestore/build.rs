fn main() {
    println!("cargo:rerun-if-changed=proto/tablestore.proto");
    prost_build::compile_protos(&["proto/tablestore.proto"], &["proto/"]).expect("compile wire protocol schema");
}
