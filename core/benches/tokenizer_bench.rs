use criterion::{criterion_group, criterion_main, Criterion};
use zapindex::tokenizer::{tokenize, Tokenizer};
use zapindex::TokenizerSettings;

const TEXT: &str = "Parser panics on empty input. Steps to reproduce: run the CLI with an empty \
    file, observe the stack trace pointing at lexer.rs:118. Expected behaviour: a clear error \
    message instead of a crash. Possibly related to the tokenizer refactor landed last week.";

fn bench_tokenize(c: &mut Criterion) {
    let text = TEXT.repeat(50);
    c.bench_function("tokenize_plain", |b| b.iter(|| tokenize(&text)));
    let stemmed = Tokenizer::new(TokenizerSettings { stopwords: true, stem: true });
    c.bench_function("tokenize_stemmed", |b| b.iter(|| stemmed.tokenize(&text)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
