use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use junior_vocab::assistant::{Analysis, Assistant, InlineImage};
use junior_vocab::catalog::{self, FilterMode};
use junior_vocab::menu::{ThemeRules, group_for_menu};
use junior_vocab::models::*;
use junior_vocab::phonics;
use junior_vocab::quiz;
use junior_vocab::remote::{CategoryUpdate, ExampleUpdate, GasClient};
use junior_vocab::review::PageCompletion;
use junior_vocab::session::{Session, VocabularySource};
use junior_vocab::transfer;
use junior_vocab::Config;

#[derive(Parser)]
#[command(name = "junior-vocab", about = "国中会考单字本：分页、复习进度与 AI 助手", version)]
struct Cli {
    /// 指定配置文件（默认读取工作目录下的 config.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出所有分类
    Categories,
    /// 列出某个分类的分页
    Pages { category: String },
    /// 显示某一页的单字
    Show {
        category: String,
        #[arg(default_value = "1")]
        page: usize,
        /// all / mistake / unfamiliar / core-super / core-reading / core-past
        #[arg(long, default_value = "all")]
        filter: FilterMode,
        /// 以此用户的进度显示状态
        #[arg(long)]
        user: Option<String>,
    },
    /// 显示分组后的下拉菜单
    Menu,
    /// 学习地图：每个分类的已读 / 精熟比例
    Overview {
        #[arg(long)]
        user: String,
    },
    /// 测试 Apps Script 网址
    TestConnection { url: Option<String> },
    /// 读取 CSV 单字表
    Import {
        file: PathBuf,
        /// 上传到远端单字表
        #[arg(long)]
        upload: bool,
    },
    /// 把目前的单字表写成 CSV
    Export { file: PathBuf },
    /// 用 AI 补齐资料后新增单字
    Add {
        term: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// 用 AI 重新补齐已有单字的资料
    Details { term: String },
    /// 用 AI 生成例句
    Example { term: String },
    /// 为缺少例句的单字批量生成例句
    FillExamples {
        #[arg(long, default_value = "10")]
        limit: usize,
        #[arg(long, default_value = "3")]
        concurrency: usize,
    },
    /// 字根 / 字族心智图
    MindMap { term: String },
    /// 音节与音标拆分
    Syllables { term: String },
    /// 切换“不熟”星号
    Star { user: String, word: String },
    /// 错误次数 +1
    Mistake { user: String, word: String },
    /// 标记某页已读完
    Complete {
        user: String,
        category: String,
        page: usize,
        /// 取消完成标记
        #[arg(long)]
        undo: bool,
    },
    /// 单字测验：优先用题库，没有题目的单字出中文意思选择题
    Quiz {
        user: String,
        category: String,
        #[arg(default_value = "1")]
        page: usize,
        /// 题数上限（0 表示整页）
        #[arg(long, default_value = "10")]
        count: usize,
        /// 加入错题本里的题目
        #[arg(long)]
        mistakes: bool,
    },
    /// SRS 自评（again / hard / good / easy）
    Srs { user: String, word: String, rating: SrsRating },
    /// 今日任务与家庭排行榜
    Dashboard { user: String },
    /// 文法讲解或练习题
    Grammar {
        topic: String,
        #[arg(long)]
        quiz: bool,
    },
    /// 分析文章或考卷（文字档或图片）
    Analyze {
        file: PathBuf,
        /// 档案是图片
        #[arg(long)]
        image: bool,
        /// 把结果存回远端（文章存文章库，题目存题库）
        #[arg(long)]
        save: bool,
        /// 题目同时加入此用户的错题本
        #[arg(long)]
        user: Option<String>,
    },
    /// 列出远端的文章
    Articles,
    /// 标记文章已读
    ReadArticle { user: String, id: String },
    /// 列出远端题库的题数
    Questions,
    /// 把一个分类下的单字全部移到另一个分类
    Recategorize { from: String, to: String },
    /// 删除远端重复的单字
    Dedupe,
    /// 清空远端单字表
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "junior_vocab=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load()?,
    };
    let client = Arc::new(GasClient::new(&config.remote)?);
    if !client.is_configured() {
        println!("⚠️  未设定远端网址，只能使用内建单字表");
    }

    match cli.command {
        Command::Categories => {
            let session = open_session(&client, &config, None).await?;
            for category in session.order().list_categories(session.words()) {
                let count = catalog::words_in_category(session.words(), &category).len();
                println!("  📂 {} ({})", category, count);
            }
        }
        Command::Pages { category } => {
            let session = open_session(&client, &config, None).await?;
            let pages = catalog::build_pages(session.words(), &category, session.page_size());
            if pages.is_empty() {
                println!("⚠️  分类「{}」没有单字", category);
            }
            for page in pages {
                let first = page.words.first().map(|w| w.term.as_str()).unwrap_or("");
                let last = page.words.last().map(|w| w.term.as_str()).unwrap_or("");
                println!("  📄 第 {} 页 [{}] {} 个：{} … {}", page.number(), page.key(), page.words.len(), first, last);
            }
        }
        Command::Show { category, page, filter, user } => {
            let mut session = open_session(&client, &config, user.as_deref()).await?;
            let words = session.page(&category, page, filter);
            if words.is_empty() {
                println!("⚠️  {} 第 {} 页没有符合条件的单字", category, page);
            }
            for word in &words {
                print_word(&session, word);
            }
            if session.tracker().is_page_complete(&category, page) {
                println!("✅ 本页已读完");
            }
            session.logout().await;
        }
        Command::Menu => {
            let session = open_session(&client, &config, None).await?;
            let rules = ThemeRules::new(config.menu.themes.clone(), config.menu.fallback.clone());
            for group in group_for_menu(session.words(), session.order(), &rules, session.page_size()) {
                println!("{}", group.label);
                for option in group.options {
                    println!("    {}  [{}]", option.label, option.value);
                }
            }
        }
        Command::Overview { user } => {
            let mut session = open_session(&client, &config, Some(&user)).await?;
            let progress = session.tracker().state_view().vocab_progress;
            for category in catalog::progress_overview(session.words(), &progress, session.order(), session.page_size()) {
                println!(
                    "📂 {}  已读 {}%  精熟 {}%  ({} 字)",
                    category.category,
                    category.viewed_pct(),
                    category.mastered_pct(),
                    category.total
                );
                for chunk in category.chunks {
                    println!("    {}  {}/{} 已读  {} 精熟", chunk.label, chunk.viewed, chunk.total, chunk.mastered);
                }
            }
            session.logout().await;
        }
        Command::TestConnection { url } => {
            let url = url.or_else(|| config.remote.url.clone()).unwrap_or_default();
            let report = client.test_connection(&url).await;
            match (report.success, report.count) {
                (true, Some(count)) => println!("✅ {}（{} 个单字）", report.message, count),
                (true, None) => println!("✅ {}", report.message),
                (false, _) => println!("❌ {}", report.message),
            }
        }
        Command::Import { file, upload } => {
            let words = transfer::import_csv(&file)?;
            println!("📥 读取 {} 个单字", words.len());
            if upload {
                let added = client.upload_vocabulary(&words).await?;
                println!("✅ 已上传，新增 {} 笔", added);
            }
        }
        Command::Export { file } => {
            let session = open_session(&client, &config, None).await?;
            transfer::export_csv(&file, session.words())?;
            println!("✅ 已写出 {} 个单字到 {}", session.words().len(), file.display());
        }
        Command::Add { term, category } => {
            let assistant = assistant(&config)?;
            let mut session = open_session(&client, &config, None).await?;
            println!("🔄 正在生成「{}」的资料...", term.trim());
            let mut word = assistant.word_details(term.trim()).await?.into_word(term.trim());
            if let Some(category) = category {
                word.category = category;
            }
            let word = session.add_word(word).await?;
            println!("✅ 已新增 {} ({}) → {}", word.term, word.id, word.category);
        }
        Command::Details { term } => {
            let assistant = assistant(&config)?;
            let session = open_session(&client, &config, None).await?;
            let mut word = find_word(&session, &term)?.clone();
            assistant.word_details(&word.term).await?.apply_to(&mut word);
            client.update_word_details(&word.id, &word).await?;
            print_word(&session, &word);
            println!("✅ 资料已更新");
        }
        Command::Example { term } => {
            let assistant = assistant(&config)?;
            let session = open_session(&client, &config, None).await?;
            let word = find_word(&session, &term)?;
            let example = assistant.example_sentence(word).await?;
            println!("📝 {}\n   {}", example.sentence, example.translation);
            if client
                .update_word_example(&word.id, &example.sentence, &example.translation)
                .await
            {
                println!("✅ 例句已存回单字表");
            }
        }
        Command::FillExamples { limit, concurrency } => {
            let assistant = assistant(&config)?;
            let session = open_session(&client, &config, None).await?;
            let missing: Vec<&Word> = session
                .words()
                .iter()
                .filter(|w| w.example.trim().is_empty())
                .take(limit)
                .collect();
            println!("📊 找到 {} 个缺少例句的单字", missing.len());

            let total = missing.len();
            let updates: Vec<ExampleUpdate> = stream::iter(missing.into_iter().enumerate())
                .map(|(i, word)| {
                    let assistant = &assistant;
                    async move {
                        println!("  🔍 {}/{}: {}", i + 1, total, word.term);
                        match assistant.example_sentence(word).await {
                            Ok(example) => Some(ExampleUpdate {
                                id: word.id.clone(),
                                example: example.sentence,
                                translation: example.translation,
                            }),
                            Err(e) => {
                                println!("    ❌ {}: {}", word.term, e);
                                None
                            }
                        }
                    }
                })
                .buffer_unordered(concurrency.max(1))
                .filter_map(|update| async move { update })
                .collect()
                .await;

            if !updates.is_empty() {
                let updated = client.update_word_example_batch(&updates).await?;
                println!("✅ 已更新 {} 笔例句", updated);
            }
        }
        Command::MindMap { term } => {
            let assistant = assistant(&config)?;
            let map = assistant.mind_map(term.trim()).await?;
            println!("🌳 {}  {}", map.root, map.root_meaning);
            for related in map.related_words {
                println!("   ├─ {}  {}", related.word, related.meaning);
            }
        }
        Command::Syllables { term } => {
            let session = open_session(&client, &config, None).await?;
            match session.find_word(&term) {
                Some(word) => {
                    println!("🔤 {}", phonics::display_parts(word).join(" · "));
                    if !word.phonetic.is_empty() {
                        println!("🔊 {}", phonics::guess_phonetic_parts(&word.phonetic).join(" · "));
                    }
                }
                None => println!("🔤 {}", phonics::guess_syllables(term.trim()).join(" · ")),
            }
        }
        Command::Star { user, word } => {
            let mut session = open_session(&client, &config, Some(&user)).await?;
            let id = find_word(&session, &word)?.id.clone();
            let sync = session.tracker().toggle_unfamiliar(&id);
            let marked = session.tracker().is_marked(&id);
            report_sync(sync.finished().await);
            println!("{} {}", if marked { "⭐ 已加入不熟" } else { "☆ 已移除不熟" }, word);
            session.logout().await;
        }
        Command::Mistake { user, word } => {
            let mut session = open_session(&client, &config, Some(&user)).await?;
            let id = find_word(&session, &word)?.id.clone();
            let (count, sync) = session.tracker().record_mistake(&id);
            report_sync(sync.finished().await);
            println!("❌ {} 错误次数：{}", word, count);
            session.logout().await;
        }
        Command::Complete { user, category, page, undo } => {
            let mut session = open_session(&client, &config, Some(&user)).await?;
            match session.complete_page(&category, page, Some(!undo)) {
                PageCompletion::Ignored => println!("⚠️  「{}」视图没有完成标记", category),
                PageCompletion::Unchanged => println!("ℹ️  状态没有变化"),
                PageCompletion::Reopened => println!("🔄 已取消 {}-{} 的完成标记", category, page),
                PageCompletion::Completed(sync) => {
                    if let Some(sync) = sync {
                        report_sync(sync.finished().await);
                    }
                    println!("✅ {}-{} 已读完", category, page);
                }
            }
            session.logout().await;
        }
        Command::Quiz { user, category, page, count, mistakes } => {
            let mut session = open_session(&client, &config, Some(&user)).await?;
            let bank = client.fetch_questions().await.unwrap_or_default();
            let extra = if mistakes {
                session.tracker().state_view().mistake_questions
            } else {
                Vec::new()
            };
            let questions = {
                let words = session.page(&category, page, FilterMode::All);
                quiz::build_quiz(&words, &bank, session.words(), &extra, count, &mut rand::rng())
            };
            if questions.is_empty() {
                println!("⚠️  {} 第 {} 页没有可用的题目", category, page);
            } else {
                run_quiz(&session, &questions).await?;
            }
            session.logout().await;
        }
        Command::Srs { user, word, rating } => {
            let mut session = open_session(&client, &config, Some(&user)).await?;
            let id = find_word(&session, &word)?.id.clone();
            if let Some(sync) = session.tracker().submit_srs_rating(&id, rating) {
                report_sync(sync.finished().await);
            }
            let status = session.tracker().mastery(&id);
            println!("📈 {} → {}{}", word, status.mastery.label(), if status.marked { "（易錯）" } else { "" });
            session.logout().await;
        }
        Command::Dashboard { user } => {
            let mut session = open_session(&client, &config, Some(&user)).await?;
            println!("📅 今日任务");
            for (label, kind) in [("新字", MissionKind::New), ("复习", MissionKind::Review), ("精熟挑战", MissionKind::Mastery)] {
                let words: Vec<&str> = session.mission_words(kind).iter().map(|w| w.term.as_str()).collect();
                println!("   {} ({}): {}", label, words.len(), words.join(", "));
            }
            match session.refresh_family_stats().await {
                Some(stats) => {
                    println!("🏆 家庭排行榜");
                    for (rank, entry) in stats.leaderboard.iter().enumerate() {
                        println!(
                            "   {}. {} {}  精熟 {:.0}%  测验 {}  错误 {}",
                            rank + 1,
                            entry.avatar,
                            entry.username,
                            entry.mastery_pct,
                            entry.quiz_count,
                            entry.mistake_count
                        );
                    }
                    let family = stats.family_progress;
                    println!(
                        "   全家：{} 字，已读 {}，精熟 {}",
                        family.total_words, family.viewed_words, family.mastered_words
                    );
                }
                None => println!("⚠️  无法取得排行榜"),
            }
            session.logout().await;
        }
        Command::Grammar { topic, quiz } => {
            if quiz {
                let remote = client.fetch_grammar_questions(&topic).await.unwrap_or_default();
                let questions = if remote.is_empty() {
                    assistant(&config)?.grammar_quiz(&topic).await?
                } else {
                    remote
                };
                print_questions(&questions);
            } else {
                println!("{}", assistant(&config)?.grammar_lesson(&topic).await?);
            }
        }
        Command::Analyze { file, image, save, user } => {
            let assistant = assistant(&config)?;
            let (text, picture) = if image {
                (String::new(), Some(InlineImage::from_path(&file)?))
            } else {
                let text = std::fs::read_to_string(&file).with_context(|| format!("无法读取 {}", file.display()))?;
                (text, None)
            };
            println!("🔄 开始分析...");
            match assistant.analyze_material(&text, picture.as_ref()).await? {
                Analysis::Article { content } => {
                    println!("📖 文章\n{}\n\n{}", content.english, content.chinese);
                    if save {
                        let article = Article {
                            title: content.english.split_whitespace().take(6).collect::<Vec<_>>().join(" "),
                            english: content.english,
                            chinese: content.chinese,
                            created_at: chrono::Utc::now().to_rfc3339(),
                            ..Default::default()
                        };
                        report_sync(client.save_article(&article).await);
                    }
                }
                Analysis::Quiz { questions } => {
                    print_questions(&questions);
                    if save {
                        println!("✅ {}", client.save_questions(&questions).await?);
                    }
                    if let Some(user) = user {
                        report_sync(client.sync_questions(&user, &questions).await);
                    }
                }
            }
        }
        Command::Articles => {
            for article in client.fetch_articles().await {
                println!("📰 [{}] {}  {}", article.id, article.title, article.created_at);
            }
        }
        Command::ReadArticle { user, id } => {
            report_sync(client.mark_article_read(&user, &id).await);
        }
        Command::Questions => match client.fetch_questions().await {
            Some(bank) => {
                let mut topics: Vec<_> = bank.into_iter().collect();
                topics.sort_by(|a, b| a.0.cmp(&b.0));
                for (topic, questions) in topics {
                    println!("  ❓ {}: {} 题", topic, questions.len());
                }
            }
            None => println!("⚠️  无法取得题库"),
        },
        Command::Recategorize { from, to } => {
            if catalog::is_reserved_category(&to) {
                anyhow::bail!("分类名称「{}」为保留字", to.trim());
            }
            let session = open_session(&client, &config, None).await?;
            let updates: Vec<CategoryUpdate> = catalog::words_in_category(session.words(), &from)
                .into_iter()
                .map(|w| CategoryUpdate {
                    id: w.id.clone(),
                    category: to.trim().to_string(),
                })
                .collect();
            if updates.is_empty() {
                println!("⚠️  分类「{}」没有单字", from);
            } else {
                let updated = client.update_word_categories(&updates).await?;
                println!("✅ 已移动 {} 个单字到「{}」", updated, to.trim());
            }
        }
        Command::Dedupe => {
            let removed = client.remove_duplicate_words().await?;
            println!("✅ 删除了 {} 个重复单字", removed);
        }
        Command::Clear { yes } => {
            if !yes {
                anyhow::bail!("这会清空远端单字表，确认请加上 --yes");
            }
            client.clear_vocabulary().await?;
            println!("🗑️  远端单字表已清空");
        }
    }

    Ok(())
}

async fn open_session(client: &Arc<GasClient>, config: &Config, user: Option<&str>) -> Result<Session<GasClient>> {
    let mut session = Session::new(Arc::clone(client), config);
    if session.load_vocabulary().await == VocabularySource::Bundled {
        println!("📦 使用内建单字表（{} 字）", session.words().len());
    }
    if let Some(user) = user {
        session.login(user).await?;
    }
    Ok(session)
}

fn assistant(config: &Config) -> Result<Assistant> {
    let assistant = Assistant::new(&config.ai)?;
    if !assistant.is_ready() {
        println!("⚠️  请设置 JUNIOR_VOCAB_API_KEY 或 OPENROUTER_API_KEY 环境变量");
        println!("   export OPENROUTER_API_KEY=your_api_key");
    }
    Ok(assistant)
}

fn find_word<'a>(session: &'a Session<GasClient>, key: &str) -> Result<&'a Word> {
    session
        .find_word(key)
        .ok_or_else(|| anyhow::anyhow!("找不到单字「{}」", key.trim()))
}

fn print_word(session: &Session<GasClient>, word: &Word) {
    let status = session.tracker().mastery(&word.id);
    let star = if status.marked { "⭐" } else { "  " };
    let tag = word.core_tag.as_deref().map(|t| format!(" 〔{}〕", t)).unwrap_or_default();
    println!(
        "{} {}  {}  {} {}  [{}]{}",
        star,
        word.term,
        phonics::display_parts(word).join("·"),
        word.part_of_speech,
        word.meaning,
        if status.marked { "易錯" } else { status.mastery.label() },
        tag
    );
    if !word.example.is_empty() {
        println!("      {}  {}", word.example, word.example_translation);
    }
    let mistakes = session.tracker().mistake_count(&word.id);
    if mistakes > 0 {
        println!("      ❌ 错误 {} 次", mistakes);
    }
}

fn print_questions(questions: &[QuizQuestion]) {
    for (i, question) in questions.iter().enumerate() {
        println!("{}. {}", i + 1, question.question);
        for (j, option) in question.options.iter().enumerate() {
            let mark = if j == question.correct_answer_index { "✔" } else { " " };
            println!("   {} ({}) {}", mark, quiz::option_label(j), option);
        }
        if let Some(explanation) = &question.explanation {
            println!("   💡 {}", explanation);
        }
    }
}

async fn run_quiz(session: &Session<GasClient>, questions: &[QuizQuestion]) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut results = Vec::new();
    let mut syncs = Vec::new();

    for (i, question) in questions.iter().enumerate() {
        println!("\n❓ {}/{}  {}", i + 1, questions.len(), question.question);
        for (j, option) in question.options.iter().enumerate() {
            println!("   ({}) {}", quiz::option_label(j), option);
        }
        let choice = loop {
            let Some(line) = input.next_line().await? else {
                break None;
            };
            match quiz::parse_choice(&line, question.options.len()) {
                Some(choice) => break Some(choice),
                None => println!("   请输入选项字母或编号"),
            }
        };
        let Some(choice) = choice else {
            println!("⚠️  输入结束，只提交已作答的题目");
            break;
        };

        let answer = session.tracker().record_quiz_answer(question, choice);
        if answer.correct {
            println!("✅ 答对了");
        } else {
            let right = question
                .options
                .get(question.correct_answer_index)
                .map(String::as_str)
                .unwrap_or("");
            println!("❌ 正确答案：({}) {}", quiz::option_label(question.correct_answer_index), right);
        }
        if let Some(explanation) = &question.explanation {
            println!("   💡 {}", explanation);
        }
        syncs.extend(answer.mistake_sync);
        results.push(QuizResultSubmission {
            word_id: question.word_id.clone(),
            is_correct: answer.correct,
        });
    }

    for sync in syncs {
        report_sync(sync.finished().await);
    }
    let score = results.iter().filter(|r| r.is_correct).count();
    let answered = results.len();
    if answered > 0 {
        if let Some(sync) = session.tracker().complete_quiz(results) {
            report_sync(sync.finished().await);
        }
    }
    println!("\n📊 得分 {} / {}", score, answered);
    Ok(())
}

fn report_sync(ok: bool) {
    if !ok {
        println!("⚠️  远端同步失败，本地状态已更新");
    }
}
