fn main() {
    glib_build_tools::compile_resources(
        &["data"],
        "data/parley.gresource.xml",
        "parley.gresource",
    );
}
