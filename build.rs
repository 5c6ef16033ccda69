fn main() {
    // sqldrop runs as an unattended service, often on hosts without the
    // Visual C++ redistributable installed
    // Enables static linking of the vcruntime library on Windows builds
    static_vcruntime::metabuild();
}
