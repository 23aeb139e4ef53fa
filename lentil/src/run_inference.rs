use clap::Args;
use lentil::config::ComputeDevice;
use lentil::inference::*;

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long, required = true, help = "Model directory")]
    model_dir: Box<str>,

    #[arg(
        long = "vec-file",
        required = true,
        help = "Documents to encode (sparse vector format)"
    )]
    vec_file: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output JSON file",
        long_help = "Output JSON with `term_topic` (topics x terms),\n\
		     `topic_doc` (documents x topics), `doc_lengths`\n\
		     and `term_freqs`."
    )]
    out: Box<str>,

    #[arg(long, default_value_t = DEFAULT_INFERENCE_BATCH, help = "Documents per batch")]
    batch_size: usize,

    #[arg(long, value_enum, default_value = "cpu", help = "Candle device")]
    device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "A device for cuda")]
    device_no: usize,
}

#[derive(Args, Debug)]
pub struct TopicsArgs {
    #[arg(long, required = true, help = "Model directory")]
    model_dir: Box<str>,

    #[arg(short = 'k', long, default_value_t = 10, help = "Terms per topic")]
    top_k: usize,
}

pub fn export_inference(args: &ExportArgs) -> anyhow::Result<()> {
    let dev = args.device.device(args.device_no)?;
    let inference = TopicInference::read(&args.model_dir, dev)?.with_batch_size(args.batch_size);
    inference.export_inference_details(&args.vec_file, &args.out)
}

pub fn print_topics(args: &TopicsArgs) -> anyhow::Result<()> {
    let inference = TopicInference::read(&args.model_dir, ComputeDevice::Cpu.device(0)?)?;
    for (k, terms) in inference.top_k_terms(args.top_k)?.iter().enumerate() {
        println!("{}\t{}", k, terms.join(" "));
    }
    Ok(())
}
