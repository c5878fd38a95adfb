fn main() {
    // Templates are compiled into release builds; debug builds read them from disk.
    minijinja_embed::embed_templates!("templates");
}
