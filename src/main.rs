fn main() {
    canviewer_lib::run()
}
