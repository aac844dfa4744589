fn main() {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }
    prost_build::compile_protos(
        &["src/proto/osmformat.proto", "src/proto/fileformat.proto"],
        &["src/proto"],
    )
    .expect("failed to compile protobuf");
}
